//! Publication presets
//!
//! The two publication services differ in weight: micropublications are
//! quick single-transect pages, shoreline publications are full site reports
//! and take considerably longer to render.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{MaterializeError, PollPolicy};

const REMOTE_HOST: &str = "coastsat.livepublication.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicationProfile {
    #[default]
    Micropublication,
    ShorelinePublication,
}

impl PublicationProfile {
    /// Read `LIVEPUB_PROFILE`, defaulting to micropublications.
    pub fn from_env() -> Result<Self, MaterializeError> {
        match livepub_common::config::env_opt("LIVEPUB_PROFILE") {
            Some(raw) => raw.parse(),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let (max_attempts, interval_ms) = match self {
            Self::Micropublication => (10, 1000),
            Self::ShorelinePublication => (15, 2000),
        };
        PollPolicy {
            max_attempts,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub fn local_port(&self) -> u16 {
        match self {
            Self::Micropublication => 8765,
            Self::ShorelinePublication => 8766,
        }
    }

    pub fn remote_path(&self) -> &'static str {
        match self {
            Self::Micropublication => "/micropub",
            Self::ShorelinePublication => "/shorelineapi",
        }
    }

    /// Local development service when the map is served from loopback,
    /// the hosted service otherwise.
    pub fn base_url_for_host(&self, host: &str) -> String {
        if is_loopback(host) {
            format!("http://localhost:{}", self.local_port())
        } else {
            format!("https://{}{}", REMOTE_HOST, self.remote_path())
        }
    }
}

fn is_loopback(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    matches!(host, "localhost" | "127.0.0.1")
}

impl fmt::Display for PublicationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Micropublication => write!(f, "micropublication"),
            Self::ShorelinePublication => write!(f, "shoreline"),
        }
    }
}

impl FromStr for PublicationProfile {
    type Err = MaterializeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "micropublication" | "micropub" => Ok(Self::Micropublication),
            "shoreline" | "shorelinepub" | "shoreline-publication" => {
                Ok(Self::ShorelinePublication)
            }
            other => Err(MaterializeError::Configuration(format!(
                "Unknown publication profile: {}. Supported profiles: micropublication, shoreline",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_policies() {
        let micro = PublicationProfile::Micropublication.poll_policy();
        assert_eq!(micro.max_attempts, 10);
        assert_eq!(micro.interval, Duration::from_millis(1000));

        let shoreline = PublicationProfile::ShorelinePublication.poll_policy();
        assert_eq!(shoreline.max_attempts, 15);
        assert_eq!(shoreline.interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_base_url_selection() {
        let micro = PublicationProfile::Micropublication;
        assert_eq!(micro.base_url_for_host("localhost"), "http://localhost:8765");
        assert_eq!(micro.base_url_for_host("127.0.0.1:8000"), "http://localhost:8765");
        assert_eq!(
            micro.base_url_for_host("coastsat.livepublication.org"),
            "https://coastsat.livepublication.org/micropub"
        );

        let shoreline = PublicationProfile::ShorelinePublication;
        assert_eq!(shoreline.base_url_for_host("localhost"), "http://localhost:8766");
        assert_eq!(
            shoreline.base_url_for_host("130.216.216.92"),
            "https://coastsat.livepublication.org/shorelineapi"
        );
    }

    #[test]
    fn test_parse_profile() {
        assert_eq!(
            "Shoreline".parse::<PublicationProfile>().unwrap(),
            PublicationProfile::ShorelinePublication
        );
        assert_eq!(
            "micropub".parse::<PublicationProfile>().unwrap(),
            PublicationProfile::Micropublication
        );
        let err = "tides".parse::<PublicationProfile>().unwrap_err();
        assert!(err.to_string().contains("Unknown publication profile: tides"));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for profile in [
            PublicationProfile::Micropublication,
            PublicationProfile::ShorelinePublication,
        ] {
            assert_eq!(profile.to_string().parse::<PublicationProfile>().unwrap(), profile);
        }
    }
}
