use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    controller::{EntityKind, EntitySpec, Feed, ReadyPolicy, TrackingSettings},
    error::Error,
    geo::{EntityId, Position},
    path::Retention,
    surface::{Container, PanOptions},
};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub map: MapConfig,
    #[serde(default)]
    pub readiness: ReadyPolicy,
    #[serde(default)]
    pub paths: PathConfig,
    /// Fix reported by the device location capability, if there is one.
    #[serde(default)]
    pub device: Option<Position>,
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntitySpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    #[serde(default = "default_container")]
    pub container: Container,
    pub center: Position,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub follow: Option<EntityId>,
    #[serde(default = "default_pan_duration_ms")]
    pub pan_duration_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    #[serde(default)]
    pub retention: Retention,
}

fn default_container() -> Container {
    Container("tracking-map".to_string())
}

fn default_zoom() -> f64 {
    14.0
}

fn default_pan_duration_ms() -> u64 {
    1000
}

impl Config {
    pub fn parse(path: Option<String>) -> Result<Self, Error> {
        let config_paths = [
            std::env::var("CONVOY_CONFIG")
                .unwrap_or_else(|_| "/etc/convoy/convoy.toml".to_string()),
            "./convoy.toml".to_string(),
        ];
        for path in path.into_iter().chain(config_paths) {
            let config = match std::fs::read_to_string(&path) {
                Ok(config) => config,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            debug!(%path, "loaded config");
            return Self::from_toml(&config);
        }
        Err(Error::ConfigNotFound)
    }

    pub fn from_toml(config: &str) -> Result<Self, Error> {
        Ok(toml::from_str(config)?)
    }

    /// Two trucks on fixed routes through Accra and a driver wandering nearby.
    pub fn demo() -> Result<Self, Error> {
        let p = Position::new;
        let center = p(-0.187, 5.6037)?;
        Ok(Config {
            map: MapConfig {
                container: default_container(),
                center,
                zoom: default_zoom(),
                follow: None,
                pan_duration_ms: default_pan_duration_ms(),
            },
            readiness: ReadyPolicy::default(),
            paths: PathConfig {
                retention: NonZeroUsize::new(500).map_or(Retention::Unbounded, Retention::Window),
            },
            device: Some(center),
            entities: vec![
                EntitySpec::new("truck-1", "Truck 1")
                    .color("#2563eb")
                    .feed(Feed::Route {
                        route: vec![center, p(-0.19, 5.605)?],
                        interval_ms: 2000,
                    }),
                EntitySpec::new("truck-2", "Truck 2")
                    .color("#16a34a")
                    .feed(Feed::Route {
                        route: vec![
                            p(-0.205, 5.556)?,
                            p(-0.2, 5.56)?,
                            p(-0.196, 5.565)?,
                            p(-0.2, 5.57)?,
                        ],
                        interval_ms: 2000,
                    }),
                EntitySpec::new("driver-1", "Driver 1")
                    .kind(EntityKind::Driver)
                    .color("#dc2626")
                    .initial(p(-0.18, 5.6)?)
                    .feed(Feed::RandomWalk {
                        spread: 0.01,
                        interval_ms: 10000,
                    }),
                EntitySpec::new("me", "You")
                    .kind(EntityKind::Driver)
                    .color("#9333ea")
                    .feed(Feed::Geolocation),
            ],
        })
    }

    pub fn settings(&self) -> TrackingSettings {
        TrackingSettings {
            center: self.map.center,
            zoom: self.map.zoom,
            follow: self.map.follow.clone(),
            pan: PanOptions {
                zoom: None,
                duration: Duration::from_millis(self.map.pan_duration_ms),
            },
            ready: self.readiness,
            retention: self.paths.retention,
        }
    }
}
