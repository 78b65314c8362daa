// ISO/IEC 15444-9 Annex C
//
// Request fields of a JPIP query string, `name=value` pairs separated by
// `&`. Field names are case insensitive. Only the fields this server acts on
// are interpreted; the others are skipped.
use jp2::BoxType;
use log::debug;

use crate::request::{MetadataRequest, ViewWindowRequest};
use crate::session::Transport;
use crate::JPIPError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub target: Option<String>,
    pub cid: Option<String>,
    /// Transport of a channel to open.
    pub cnew: Option<Transport>,
    /// Channels to close; `*` closes every channel of the session.
    pub cclose: Vec<String>,
    /// The view-window fields. `csn` is left 0 for the server to fill in.
    pub request: ViewWindowRequest,
}

pub fn parse_query(query: &str) -> Result<Query, JPIPError> {
    let mut parsed = Query::default();

    for field in query.split(['&', '\n']).filter(|f| !f.is_empty()) {
        let (name, value) = match field.split_once('=') {
            Some((name, value)) => (name, percent_decode(value)),
            None => (field, String::new()),
        };
        let invalid = || JPIPError::InvalidQuery {
            field: name.to_string(),
            value: value.clone(),
        };

        match name.to_ascii_lowercase().as_str() {
            "target" => parsed.target = Some(value.clone()),
            "fsiz" => {
                let numbers: Vec<&str> = value.split(',').collect();
                if numbers.len() > 2 && numbers[2] != "round-down" {
                    debug!("fsiz rounding {:?} served as round-down", numbers[2]);
                }
                parsed.request.frame_size = Some(pair(&numbers).ok_or_else(invalid)?);
            }
            "roff" => {
                let numbers: Vec<&str> = value.split(',').collect();
                parsed.request.region_offset = Some(pair(&numbers).ok_or_else(invalid)?);
            }
            "rsiz" => {
                let numbers: Vec<&str> = value.split(',').collect();
                parsed.request.region_size = Some(pair(&numbers).ok_or_else(invalid)?);
            }
            "comps" => parsed.request.components = Some(ranges(&value).ok_or_else(invalid)?),
            "layers" => parsed.request.layers = Some(value.parse().map_err(|_| invalid())?),
            "len" => parsed.request.max_bytes = Some(value.parse().map_err(|_| invalid())?),
            "cid" => parsed.cid = Some(value.clone()),
            "cnew" => {
                // The client lists the transports it accepts, best first.
                let transport = value.split(',').find_map(|name| match name {
                    "http" => Some(Transport::Http),
                    "http-tcp" => Some(Transport::HttpTcp),
                    _ => None,
                });
                parsed.cnew = Some(transport.ok_or_else(invalid)?);
            }
            "cclose" => parsed.cclose = value.split(',').map(str::to_string).collect(),
            "metareq" => parsed.request.metadata = metareq(&value).ok_or_else(invalid)?,
            _ => debug!("ignoring query field {:?}", name),
        }
    }

    Ok(parsed)
}

fn pair(numbers: &[&str]) -> Option<(u32, u32)> {
    match numbers {
        [x, y, ..] => Some((x.trim().parse().ok()?, y.trim().parse().ok()?)),
        _ => None,
    }
}

// "0,2-4" => [0, 2, 3, 4]
fn ranges(value: &str) -> Option<Vec<u16>> {
    let mut components = Vec::new();
    for range in value.split(',') {
        match range.split_once('-') {
            Some((first, last)) => {
                let first: u16 = first.parse().ok()?;
                let last: u16 = last.parse().ok()?;
                if last < first {
                    return None;
                }
                components.extend(first..=last);
            }
            None => components.push(range.parse().ok()?),
        }
    }
    Some(components)
}

// "[xml ;asoc/w]R0D1!!": each bracketed property names a box type or `*`.
// Limits, flags, root-bin and depth are accepted and not interpreted.
fn metareq(value: &str) -> Option<Vec<MetadataRequest>> {
    let start = value.find('[')?;
    let end = start + value[start..].find(']')?;
    let mut requests = Vec::new();
    for property in value[start + 1..end].split(';') {
        let box_name = property
            .split([':', '/', '!'])
            .next()
            .unwrap_or_default();
        if box_name == "*" {
            requests.push(MetadataRequest::All);
            continue;
        }
        let bytes = box_name.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return None;
        }
        let mut box_type: BoxType = *b"    ";
        box_type[..bytes.len()].copy_from_slice(bytes);
        requests.push(MetadataRequest::BoxType(box_type));
    }
    Some(requests)
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (bytes[i], hex) {
            (b'%', Some(byte)) => {
                decoded.push(byte);
                i += 3;
            }
            (b'+', _) => {
                decoded.push(b' ');
                i += 1;
            }
            (byte, _) => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("xml%20"), "xml ");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
    }

    #[test]
    fn test_ranges() {
        assert_eq!(ranges("0,2-4"), Some(vec![0, 2, 3, 4]));
        assert_eq!(ranges("3-1"), None);
    }

    #[test]
    fn test_metareq() {
        assert_eq!(
            metareq("[xml ;*]R0D1"),
            Some(vec![
                MetadataRequest::BoxType(*b"xml "),
                MetadataRequest::All
            ])
        );
        assert_eq!(
            metareq("[asoc/w!]"),
            Some(vec![MetadataRequest::BoxType(*b"asoc")])
        );
    }
}
