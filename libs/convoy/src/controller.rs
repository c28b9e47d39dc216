use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    geo::{EntityId, Position},
    geolocation::{GeolocationSource, LocationProvider},
    path::{EntityPathAccumulator, Path, Retention},
    sim::{
        DEFAULT_ROUTE_INTERVAL, DEFAULT_WALK_INTERVAL, DEFAULT_WALK_SPREAD, Motion,
        PositionSimulator,
    },
    surface::{LineStyle, MapBackend, MapSurfaceAdapter, PanOptions, SurfaceHandle, ViewHost},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unmounted,
    Initializing,
    Tracking,
}

/// Bounded wait for a dependency that is not ready yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadyPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for ReadyPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval_ms: 100,
        }
    }
}

impl ReadyPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    #[default]
    Vehicle,
    Driver,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Vehicle => f.write_str("vehicle"),
            EntityKind::Driver => f.write_str("driver"),
        }
    }
}

/// Where an entity's positions come from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Feed {
    Route {
        route: Vec<Position>,
        #[serde(default = "default_route_interval_ms")]
        interval_ms: u64,
    },
    RandomWalk {
        #[serde(default = "default_walk_spread")]
        spread: f64,
        #[serde(default = "default_walk_interval_ms")]
        interval_ms: u64,
    },
    /// One device fix per mount.
    Geolocation,
    /// Updates are pushed by the caller through [`TrackingController::updates`].
    #[default]
    Manual,
}

fn default_route_interval_ms() -> u64 {
    DEFAULT_ROUTE_INTERVAL.as_millis() as u64
}

fn default_walk_interval_ms() -> u64 {
    DEFAULT_WALK_INTERVAL.as_millis() as u64
}

fn default_walk_spread() -> f64 {
    DEFAULT_WALK_SPREAD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySpec {
    pub id: EntityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub initial: Option<Position>,
    #[serde(default)]
    pub feed: Feed,
}

impl EntitySpec {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            kind: EntityKind::default(),
            color: None,
            initial: None,
            feed: Feed::default(),
        }
    }

    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn initial(mut self, pos: Position) -> Self {
        self.initial = Some(pos);
        self
    }

    pub fn feed(mut self, feed: Feed) -> Self {
        self.feed = feed;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub style: LineStyle,
    pub feed: Feed,
    pub current: Option<Position>,
    pub path: Path,
}

impl TrackedEntity {
    fn from_spec(spec: EntitySpec, current: Option<Position>) -> Self {
        let mut style = LineStyle::default();
        if let Some(color) = spec.color {
            style.color = color;
        }
        Self {
            name: spec.name.unwrap_or_else(|| spec.id.to_string()),
            id: spec.id,
            kind: spec.kind,
            style,
            feed: spec.feed,
            current,
            path: Path::from([]),
        }
    }

    /// Marker label shown on the map.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub entity: EntityId,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub center: Position,
    pub zoom: f64,
    /// Entity the camera follows.
    pub follow: Option<EntityId>,
    pub pan: PanOptions,
    pub ready: ReadyPolicy,
    pub retention: Retention,
}

impl TrackingSettings {
    pub fn new(center: Position, zoom: f64) -> Self {
        Self {
            center,
            zoom,
            follow: None,
            pan: PanOptions::default(),
            ready: ReadyPolicy::default(),
            retention: Retention::default(),
        }
    }
}

/// One tracking session for one mounted map view.
///
/// Every entity mutation goes through the controller. Simulator timers and
/// other producers only enqueue [`PositionUpdate`]s, which are applied in
/// arrival order by [`TrackingController::run`] / [`TrackingController::step`].
/// After [`TrackingController::unmount`] the session is closed for good; a new
/// mount needs a new controller.
pub struct TrackingController<B: MapBackend> {
    adapter: MapSurfaceAdapter<B>,
    paths: EntityPathAccumulator,
    entities: BTreeMap<EntityId, TrackedEntity>,
    simulators: HashMap<EntityId, PositionSimulator>,
    settings: TrackingSettings,
    phase: Phase,
    handle: Option<SurfaceHandle>,
    located: bool,
    tx: mpsc::UnboundedSender<PositionUpdate>,
    rx: mpsc::UnboundedReceiver<PositionUpdate>,
    session: CancellationToken,
}

impl<B: MapBackend> TrackingController<B> {
    pub fn new(backend: B, settings: TrackingSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            adapter: MapSurfaceAdapter::new(backend),
            paths: EntityPathAccumulator::new(settings.retention),
            entities: BTreeMap::new(),
            simulators: HashMap::new(),
            settings,
            phase: Phase::Unmounted,
            handle: None,
            located: false,
            tx,
            rx,
            session: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        self.handle
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &MapSurfaceAdapter<B> {
        &self.adapter
    }

    pub fn entity(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    /// Sender for externally produced updates, e.g. `manual` feeds.
    pub fn updates(&self) -> mpsc::UnboundedSender<PositionUpdate> {
        self.tx.clone()
    }

    /// Cancelling this token stops [`Self::run`] and every timer of the session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.session.clone()
    }

    /// Registers an entity. Once tracking, it is rendered and its feed started
    /// right away.
    pub fn track(&mut self, spec: EntitySpec) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if self.entities.contains_key(&spec.id) {
            return Err(Error::DuplicateEntity(spec.id));
        }
        let (simulator, current) = match &spec.feed {
            Feed::Route { route, interval_ms } => {
                let motion = Motion::route(&spec.id, route.clone())?;
                let current = spec.initial.unwrap_or_else(|| motion.current());
                let sim = PositionSimulator::new(motion, Duration::from_millis(*interval_ms));
                (Some(sim), Some(current))
            }
            Feed::RandomWalk {
                spread,
                interval_ms,
            } => {
                let start = spec
                    .initial
                    .ok_or_else(|| Error::MissingInitialPosition(spec.id.clone()))?;
                let motion = Motion::random_walk(&spec.id, start, *spread)?;
                let sim = PositionSimulator::new(motion, Duration::from_millis(*interval_ms));
                (Some(sim), Some(start))
            }
            Feed::Geolocation | Feed::Manual => (None, spec.initial),
        };
        let mut entity = TrackedEntity::from_spec(spec, current);
        let id = entity.id.clone();
        let live = match (self.phase, self.handle) {
            (Phase::Tracking, Some(handle)) => Some(handle),
            _ => None,
        };
        // nothing is registered until the entity is on the map
        if let (Some(handle), Some(pos)) = (live, current) {
            match Self::draw(&mut self.adapter, &self.paths, handle, &entity, pos) {
                Ok(path) => {
                    self.paths.insert(&id, path.clone());
                    entity.path = path;
                }
                Err(err) => {
                    self.release(handle, &id);
                    return Err(err);
                }
            }
        }
        info!(entity = %id, kind = %entity.kind, feed = ?entity.feed, "tracking entity");
        self.entities.insert(id.clone(), entity);
        if let Some(sim) = simulator {
            self.simulators.insert(id.clone(), sim);
            if live.is_some() {
                self.start_feed(&id);
            }
        }
        Ok(())
    }

    /// Stops tracking an entity and releases its marker and path layer.
    pub fn untrack(&mut self, id: &EntityId) -> bool {
        if let Some(mut sim) = self.simulators.remove(id) {
            sim.stop();
        }
        if self.entities.remove(id).is_none() {
            return false;
        }
        self.paths.remove(id);
        self.purge_queued(id);
        if let Some(handle) = self.handle {
            self.release(handle, id);
        }
        info!(entity = %id, "untracked entity");
        true
    }

    fn release(&mut self, handle: SurfaceHandle, id: &EntityId) {
        self.adapter.remove_marker(handle, id);
        self.adapter.remove_path_layer(handle, id);
    }

    /// Creates the map surface in `host` and starts every feed.
    ///
    /// Waits, with bounded retries, for the host container and for the
    /// surface to finish loading. On failure everything acquired so far is
    /// released and the session is closed.
    pub async fn mount(&mut self, host: &impl ViewHost) -> Result<SurfaceHandle, Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if let (Phase::Tracking, Some(handle)) = (self.phase, self.handle) {
            return Ok(handle);
        }
        self.phase = Phase::Initializing;
        match self.initialize(host).await {
            Ok(handle) => {
                self.phase = Phase::Tracking;
                let ids: Vec<EntityId> = self.simulators.keys().cloned().collect();
                for id in &ids {
                    self.start_feed(id);
                }
                info!(entities = self.entities.len(), "tracking started");
                Ok(handle)
            }
            Err(err) => {
                warn!(%err, "map surface failed to initialize, tracking disabled");
                self.unmount();
                Err(err)
            }
        }
    }

    async fn initialize(&mut self, host: &impl ViewHost) -> Result<SurfaceHandle, Error> {
        let cancel = self.session.clone();
        let policy = self.settings.ready;
        let container = poll_ready(policy, &cancel, "container", || host.container()).await?;
        let handle =
            self.adapter
                .create_surface(&container, self.settings.center, self.settings.zoom)?;
        self.handle = Some(handle);
        let adapter = &self.adapter;
        poll_ready(policy, &cancel, "surface", || {
            adapter.is_ready(handle).then_some(())
        })
        .await?;

        let known: Vec<(EntityId, Position)> = self
            .entities
            .values()
            .filter_map(|e| Some((e.id.clone(), e.current?)))
            .collect();
        for (id, pos) in known {
            self.render(handle, &id, pos)?;
        }
        Ok(handle)
    }

    fn start_feed(&mut self, id: &EntityId) {
        let Some(sim) = self.simulators.get_mut(id) else {
            return;
        };
        let tx = self.tx.clone();
        let entity = id.clone();
        sim.start_with(self.session.clone(), move |position| {
            let _ = tx.send(PositionUpdate {
                entity: entity.clone(),
                position,
            });
        });
    }

    /// Acquires one device fix and queues it for every `geolocation` entity.
    /// Happens at most once per session.
    pub async fn locate<P: LocationProvider>(&mut self, source: &GeolocationSource<P>) {
        let targets: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.feed == Feed::Geolocation)
            .map(|e| e.id.clone())
            .collect();
        if targets.is_empty() || self.is_closed() || std::mem::replace(&mut self.located, true) {
            return;
        }
        let tx = self.tx.clone();
        let cancel = self.session.clone();
        let acquire = source.acquire(move |position| {
            for entity in targets {
                let _ = tx.send(PositionUpdate { entity, position });
            }
        });
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("session closed while locating device"),
            _ = acquire => {}
        }
    }

    /// Applies one position update: entity state, path, marker, path layer,
    /// and the camera if the entity is followed.
    ///
    /// Before the surface is ready only the entity's current position is
    /// recorded; after unmount updates are ignored.
    pub fn apply(&mut self, update: PositionUpdate) -> Result<(), Error> {
        let PositionUpdate { entity: id, position } = update;
        if self.is_closed() {
            debug!(entity = %id, "ignoring update after unmount");
            return Ok(());
        }
        let created = !self.entities.contains_key(&id);
        let entity = self.entities.entry(id.clone()).or_insert_with(|| {
            info!(entity = %id, "first observation of entity");
            TrackedEntity::from_spec(
                EntitySpec {
                    id: id.clone(),
                    name: None,
                    kind: EntityKind::default(),
                    color: None,
                    initial: None,
                    feed: Feed::Manual,
                },
                None,
            )
        });
        let (Phase::Tracking, Some(handle)) = (self.phase, self.handle) else {
            entity.current = Some(position);
            return Ok(());
        };
        if let Err(err) = self.render(handle, &id, position) {
            if created {
                self.entities.remove(&id);
                self.release(handle, &id);
            }
            return Err(err);
        }
        if self.settings.follow.as_ref() == Some(&id) {
            if let Err(err) = self.adapter.pan_to(handle, position, self.settings.pan) {
                debug!(%err, entity = %id, "camera follow failed");
            }
        }
        Ok(())
    }

    /// Draws `entity` at `pos`. Entity and path state are only committed once
    /// every surface call succeeded.
    fn render(&mut self, handle: SurfaceHandle, id: &EntityId, pos: Position) -> Result<(), Error> {
        let Some(entity) = self.entities.get_mut(id) else {
            return Ok(());
        };
        let path = Self::draw(&mut self.adapter, &self.paths, handle, entity, pos)?;
        self.paths.insert(id, path.clone());
        entity.current = Some(pos);
        entity.path = path;
        debug!(entity = %id, %pos, points = entity.path.len(), "applied update");
        Ok(())
    }

    /// Moves the marker and redraws the path line, returning the extended
    /// path without recording it.
    fn draw(
        adapter: &mut MapSurfaceAdapter<B>,
        paths: &EntityPathAccumulator,
        handle: SurfaceHandle,
        entity: &TrackedEntity,
        pos: Position,
    ) -> Result<Path, Error> {
        let path = paths.extended(&entity.id, pos);
        adapter.place_or_move_marker(handle, &entity.id, pos, &entity.label())?;
        adapter.ensure_path_layer(handle, &entity.id, &entity.style)?;
        adapter.set_path_geometry(handle, &entity.id, &path)?;
        Ok(path)
    }

    /// Waits for the next queued update and applies it. `None` once the
    /// session is shut down.
    pub async fn step(&mut self) -> Option<Result<(), Error>> {
        let cancel = self.session.clone();
        let update = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            update = self.rx.recv() => update,
        }?;
        Some(self.apply(update))
    }

    /// Applies every update already queued without waiting for more.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.rx.try_recv() {
            if let Err(err) = self.apply(update) {
                warn!(%err, "failed to apply position update");
            }
            applied += 1;
        }
        applied
    }

    /// Applies updates until the session is shut down. Failed updates are
    /// logged and tracking carries on.
    pub async fn run(&mut self) {
        while let Some(res) = self.step().await {
            if let Err(err) = res {
                warn!(%err, "failed to apply position update");
            }
        }
    }

    /// Ends the session: stops every timer, releases every marker and layer,
    /// then the surface. Safe to call any number of times.
    pub fn unmount(&mut self) {
        let was_open = !self.session.is_cancelled();
        self.session.cancel();
        for sim in self.simulators.values_mut() {
            sim.stop();
        }
        if let Some(handle) = self.handle.take() {
            for id in self.entities.keys() {
                self.adapter.remove_marker(handle, id);
                self.adapter.remove_path_layer(handle, id);
            }
            self.adapter.destroy_surface(handle);
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.simulators.clear();
        self.entities.clear();
        self.paths.clear();
        self.phase = Phase::Unmounted;
        if was_open {
            info!("tracking session closed");
        }
    }

    fn purge_queued(&mut self, id: &EntityId) {
        let mut kept = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            if update.entity != *id {
                kept.push(update);
            }
        }
        for update in kept {
            let _ = self.tx.send(update);
        }
    }
}

impl<B: MapBackend> Drop for TrackingController<B> {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn retry_backoff(base: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(8);
    (base * 2u32.pow(exponent)).min(Duration::from_secs(5))
}

async fn poll_ready<T>(
    policy: ReadyPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, Error> {
    let mut failures = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        if let Some(ready) = probe() {
            return Ok(ready);
        }
        if failures >= policy.attempts {
            warn!(what, attempts = failures, "gave up waiting for readiness");
            return Err(Error::SurfaceNotReady);
        }
        failures += 1;
        let delay = retry_backoff(policy.interval(), failures);
        debug!(what, failures, ?delay, "not ready yet");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SessionClosed),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        memory::MemoryBackend,
        surface::{Container, path_source_id},
    };

    fn pos(lon: f64, lat: f64) -> Position {
        Position::new(lon, lat).unwrap()
    }

    fn controller() -> TrackingController<MemoryBackend> {
        TrackingController::new(
            MemoryBackend::default(),
            TrackingSettings::new(pos(-0.187, 5.6037), 14.0),
        )
    }

    struct LateContainer {
        polls: Cell<u32>,
        ready_after: u32,
    }

    impl ViewHost for LateContainer {
        fn container(&self) -> Option<Container> {
            let polls = self.polls.get() + 1;
            self.polls.set(polls);
            (polls > self.ready_after).then(|| Container("late".into()))
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_backoff(base, 1), base);
        assert_eq!(retry_backoff(base, 2), base * 2);
        assert_eq!(retry_backoff(base, 50), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_places_initial_marker_and_layer() {
        let mut c = controller();
        let id = EntityId::from("driver");
        c.track(EntitySpec::new("driver", "Kofi").initial(pos(-0.2, 5.6)))
            .unwrap();
        let handle = c.mount(&Container("map".into())).await.unwrap();
        assert_eq!(c.phase(), Phase::Tracking);
        assert!(c.adapter().has_marker(&id));
        assert!(c.adapter().has_path_layer(&id));
        let map = c.adapter().backend().map(handle.map()).unwrap();
        assert_eq!(map.line(&path_source_id(&id)).unwrap(), &[pos(-0.2, 5.6)]);
        // mounting again is a no-op
        assert_eq!(c.mount(&Container("map".into())).await.unwrap(), handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_waits_for_container() {
        let mut c = controller();
        let host = LateContainer {
            polls: Cell::new(0),
            ready_after: 3,
        };
        c.mount(&host).await.unwrap();
        assert_eq!(host.polls.get(), 4);
        assert_eq!(c.phase(), Phase::Tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_gives_up_after_bounded_retries() {
        let mut c = controller();
        let host: Option<Container> = None;
        assert!(matches!(c.mount(&host).await, Err(Error::SurfaceNotReady)));
        assert_eq!(c.phase(), Phase::Unmounted);
        assert!(c.is_closed());
        assert!(matches!(
            c.mount(&Container("map".into())).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_waits_for_surface_load() {
        let mut c = TrackingController::new(
            MemoryBackend::with_load_delay(5),
            TrackingSettings::new(pos(0.0, 0.0), 10.0),
        );
        c.mount(&Container("map".into())).await.unwrap();
        assert_eq!(c.phase(), Phase::Tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_load_timeout_releases_surface() {
        let mut settings = TrackingSettings::new(pos(0.0, 0.0), 10.0);
        settings.ready = ReadyPolicy {
            attempts: 2,
            interval_ms: 10,
        };
        let mut c = TrackingController::new(MemoryBackend::with_load_delay(100), settings);
        assert!(matches!(
            c.mount(&Container("map".into())).await,
            Err(Error::SurfaceNotReady)
        ));
        assert_eq!(c.adapter().backend().live_maps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_before_mount_are_kept() {
        let mut c = controller();
        let id = EntityId::from("van");
        c.track(EntitySpec::new("van", "Van")).unwrap();
        c.apply(PositionUpdate {
            entity: id.clone(),
            position: pos(1.0, 1.0),
        })
        .unwrap();
        assert!(!c.adapter().has_marker(&id));
        c.mount(&Container("map".into())).await.unwrap();
        assert!(c.adapter().has_marker(&id));
        assert_eq!(&c.entity(&id).unwrap().path[..], &[pos(1.0, 1.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_entity_is_created_on_first_update() {
        let mut c = controller();
        c.mount(&Container("map".into())).await.unwrap();
        let tx = c.updates();
        tx.send(PositionUpdate {
            entity: "stray".into(),
            position: pos(2.0, 2.0),
        })
        .unwrap();
        assert_eq!(c.drain(), 1);
        let entity = c.entity(&"stray".into()).unwrap();
        assert_eq!(entity.name, "stray");
        assert_eq!(entity.current, Some(pos(2.0, 2.0)));
        assert_eq!(c.adapter().marker_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_validates_feeds() {
        let mut c = controller();
        assert!(matches!(
            c.track(EntitySpec::new("a", "A").feed(Feed::Route {
                route: vec![pos(0.0, 0.0)],
                interval_ms: 1000,
            })),
            Err(Error::RouteTooShort(_))
        ));
        assert!(matches!(
            c.track(EntitySpec::new("b", "B").feed(Feed::RandomWalk {
                spread: 0.01,
                interval_ms: 1000,
            })),
            Err(Error::MissingInitialPosition(_))
        ));
        assert!(matches!(
            c.track(
                EntitySpec::new("w", "W")
                    .initial(pos(0.0, 0.0))
                    .feed(Feed::RandomWalk {
                        spread: f64::NAN,
                        interval_ms: 1000,
                    })
            ),
            Err(Error::InvalidSpread { .. })
        ));
        assert!(c.entity(&"w".into()).is_none());
        c.track(EntitySpec::new("c", "C")).unwrap();
        assert!(matches!(
            c.track(EntitySpec::new("c", "C")),
            Err(Error::DuplicateEntity(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_pans_camera() {
        let mut settings = TrackingSettings::new(pos(0.0, 0.0), 10.0);
        settings.follow = Some("lead".into());
        let mut c = TrackingController::new(MemoryBackend::default(), settings);
        c.track(EntitySpec::new("lead", "Lead")).unwrap();
        c.track(EntitySpec::new("tail", "Tail")).unwrap();
        let handle = c.mount(&Container("map".into())).await.unwrap();
        c.apply(PositionUpdate {
            entity: "tail".into(),
            position: pos(3.0, 3.0),
        })
        .unwrap();
        assert_eq!(c.adapter().backend().stats().pans, 0);
        c.apply(PositionUpdate {
            entity: "lead".into(),
            position: pos(4.0, 4.0),
        })
        .unwrap();
        let map = c.adapter().backend().map(handle.map()).unwrap();
        assert_eq!(map.camera.center, pos(4.0, 4.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrack_releases_resources() {
        let mut c = controller();
        let id = EntityId::from("truck");
        c.track(EntitySpec::new("truck", "Truck").feed(Feed::Route {
            route: vec![pos(0.0, 0.0), pos(1.0, 1.0)],
            interval_ms: 1000,
        }))
        .unwrap();
        c.mount(&Container("map".into())).await.unwrap();
        c.updates()
            .send(PositionUpdate {
                entity: id.clone(),
                position: pos(5.0, 5.0),
            })
            .unwrap();
        assert!(c.untrack(&id));
        assert!(!c.untrack(&id));
        // the queued update must not resurrect the entity
        assert_eq!(c.drain(), 0);
        assert!(c.entity(&id).is_none());
        assert_eq!(c.adapter().marker_count(), 0);
        assert_eq!(c.adapter().layer_count(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(c.drain(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_while_tracking_renders_immediately() {
        let mut c = controller();
        c.mount(&Container("map".into())).await.unwrap();
        c.track(EntitySpec::new("late", "Late").initial(pos(1.0, 1.0)))
            .unwrap();
        assert!(c.adapter().has_marker(&"late".into()));
    }
}
