//! OverDrive MediaMarkers parser.
//!
//! OverDrive stores chapter markers as XML in an ID3 text frame:
//!
//! ```xml
//! <Markers>
//!   <Marker><Name>Chapter 1</Name><Time>0:00.000</Time></Marker>
//!   <Marker><Name>   Part A</Name><Time>4:12.500</Time></Marker>
//! </Markers>
//! ```
//!
//! Names are kept verbatim: leading whitespace marks sub-chapters.

use overdrive2opus_shared::{Chapter, ConvertError, Result, parse_timestamp};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

/// Name used when a marker has no `<Name>`.
pub const UNKNOWN_MARKER_NAME: &str = "Unknown name";

#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    Time,
}

#[derive(Debug, Default)]
struct MarkerBuilder {
    name: Option<String>,
    time: f64,
}

impl MarkerBuilder {
    fn finish(self) -> Chapter {
        Chapter::new(
            self.name.unwrap_or_else(|| UNKNOWN_MARKER_NAME.to_string()),
            self.time,
        )
    }
}

/// Parse a MediaMarkers XML document into file-relative chapters.
pub fn parse_media_markers(xml: &str) -> Result<Vec<Chapter>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut chapters = Vec::new();
    let mut depth = 0usize;
    let mut marker: Option<MarkerBuilder> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut has_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ConvertError::parse(format!("invalid MediaMarkers XML: {e}")))?;

        match event {
            Event::Start(e) => {
                has_root |= depth == 0;
                depth += 1;
                let tag = e.name();
                match depth {
                    2 if tag.as_ref() == b"Marker" => marker = Some(MarkerBuilder::default()),
                    2 => warn!(tag = %String::from_utf8_lossy(tag.as_ref()), "invalid XML data in MediaMarkers"),
                    3 if marker.is_some() => {
                        field = match tag.as_ref() {
                            b"Name" => Some(Field::Name),
                            b"Time" => Some(Field::Time),
                            _ => None,
                        };
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                has_root |= depth == 0;
                // Self-closing elements carry no text, so only a bare
                // `<Marker/>` at depth 2 produces anything.
                if depth + 1 == 2 {
                    if e.name().as_ref() == b"Marker" {
                        chapters.push(MarkerBuilder::default().finish());
                    } else {
                        warn!(tag = %String::from_utf8_lossy(e.name().as_ref()), "invalid XML data in MediaMarkers");
                    }
                }
            }
            Event::Text(t) if depth == 3 && field.is_some() => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| ConvertError::parse(format!("invalid MediaMarkers text: {e}")))?;
                text.push_str(&unescaped);
            }
            Event::Text(t) if depth == 0 => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(ConvertError::parse(
                        "invalid MediaMarkers XML: text outside the root element",
                    ));
                }
            }
            Event::CData(t) if depth == 3 && field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Event::End(_) => {
                match depth {
                    3 => {
                        if let (Some(f), Some(m)) = (field.take(), marker.as_mut()) {
                            apply_field(m, f, &text)?;
                        }
                    }
                    2 => {
                        if let Some(m) = marker.take() {
                            chapters.push(m.finish());
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                if depth != 0 || marker.is_some() {
                    return Err(ConvertError::parse(
                        "invalid MediaMarkers XML: unexpected end of document",
                    ));
                }
                if !has_root {
                    return Err(ConvertError::parse("invalid MediaMarkers XML: no root element"));
                }
                break;
            }
            _ => {}
        }
    }

    Ok(chapters)
}

fn apply_field(marker: &mut MarkerBuilder, field: Field, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    match field {
        Field::Name => marker.name = Some(text.to_string()),
        Field::Time => marker.time = parse_timestamp(text)?,
    }
    Ok(())
}
