//! KML rendering of a track snapshot for Google Earth network links.

use std::collections::HashMap;
use std::fmt::Write;

use relay_core::tracker::TrackRecord;
use relay_core::types::{icao_to_u32, Icao};

pub const KML_CONTENT_TYPE: &str = "application/vnd.google-earth.kml+xml";

/// Render every aircraft with a full 3D position as a placemark in a
/// `planes` folder. Placemarks are ordered by address so output is stable.
pub fn render_kml(tracks: &HashMap<Icao, TrackRecord>) -> String {
    let mut placed: Vec<(u32, f64, f64, f64)> = tracks
        .iter()
        .filter_map(|(icao, t)| {
            Some((icao_to_u32(icao), t.latitude?, t.longitude?, t.altitude?))
        })
        .collect();
    placed.sort_by_key(|p| p.0);

    let mut out = String::with_capacity(256 + placed.len() * 256);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    out.push_str("  <Folder>\n");
    out.push_str("    <name>planes</name>\n");

    for (address, lat, lon, alt) in placed {
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "    <Placemark>\n\
             \x20     <name>{address:x}</name>\n\
             \x20     <Point>\n\
             \x20       <extrude>1</extrude>\n\
             \x20       <altitudeMode>relativeToGround</altitudeMode>\n\
             \x20       <coordinates>{lon:.6},{lat:.6},{alt:.6}</coordinates>\n\
             \x20     </Point>\n\
             \x20   </Placemark>\n"
        );
    }

    out.push_str("  </Folder>\n");
    out.push_str("</kml>\n");
    out
}
