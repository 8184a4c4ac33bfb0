//! Route compression dictionary

use std::collections::HashMap;

use pn_protocol::ProtocolError;

/// Bidirectional route name <-> code mapping installed at handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDictionary {
    dict: HashMap<String, u16>,
    abbrs: HashMap<u16, String>,
}

impl RouteDictionary {
    /// Build from the handshake `sys.dict` map
    ///
    /// The inverse is derived here. A code outside the two-byte range cannot
    /// travel on the wire, and a code shared by two routes has no single
    /// inverse; both are rejected.
    pub fn from_map<I, S>(entries: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let mut dictionary = Self::default();
        for (route, code) in entries {
            let code = u16::try_from(code).map_err(|_| {
                ProtocolError::RouteOverflow(u32::try_from(code).unwrap_or(u32::MAX))
            })?;
            let route = route.into();
            if let Some(other) = dictionary.abbrs.get(&code) {
                if *other != route {
                    return Err(ProtocolError::InvalidSchema(format!(
                        "routes '{}' and '{}' share code {}",
                        other, route, code
                    )));
                }
            }
            dictionary.abbrs.insert(code, route.clone());
            dictionary.dict.insert(route, code);
        }
        Ok(dictionary)
    }

    /// Compressed code for `route`
    pub fn code(&self, route: &str) -> Option<u16> {
        self.dict.get(route).copied()
    }

    /// Route name for a compressed `code`
    pub fn route(&self, code: u16) -> Option<&str> {
        self.abbrs.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}
