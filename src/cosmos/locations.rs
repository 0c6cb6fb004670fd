//! Regional endpoint selection from the account descriptor.

use reqwest::Url;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AccountLocation {
    pub name: String,
    #[serde(rename = "databaseAccountEndpoint")]
    pub endpoint: String,
}

/// The subset of `GET /` the client cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub writable_locations: Vec<AccountLocation>,
    #[serde(default)]
    pub readable_locations: Vec<AccountLocation>,
}

/// Endpoints chosen for writes and reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub write: Url,
    pub read: Url,
    pub read_region: Option<String>,
}

impl ResolvedEndpoints {
    /// Reads and writes both go to `endpoint`.
    pub fn single(endpoint: Url) -> Self {
        Self {
            write: endpoint.clone(),
            read: endpoint,
            read_region: None,
        }
    }

    /// Writes go to the first writable location; reads go to the first
    /// preferred region that is readable. Regions compare case-insensitively and
    /// ignore spaces, so "East US 2" matches "eastus2".
    pub fn resolve(
        default_endpoint: &Url,
        descriptor: &AccountDescriptor,
        preferred_regions: &[String],
    ) -> Self {
        let write = descriptor
            .writable_locations
            .first()
            .and_then(|location| parse_endpoint(&location.endpoint))
            .unwrap_or_else(|| default_endpoint.clone());

        let preferred_read = preferred_regions.iter().find_map(|region| {
            let wanted = normalize(region);
            descriptor
                .readable_locations
                .iter()
                .find(|location| normalize(&location.name) == wanted)
                .and_then(|location| {
                    parse_endpoint(&location.endpoint).map(|url| (url, location.name.clone()))
                })
        });

        match preferred_read {
            Some((read, region)) => Self {
                write,
                read,
                read_region: Some(region),
            },
            None => Self::single(write),
        }
    }
}

fn normalize(region: &str) -> String {
    region
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_endpoint(raw: &str) -> Option<Url> {
    Url::parse(raw).ok()
}
