//! Ownership of the external map rendering surface.
//!
//! [`MapBackend`] is the rendering engine's own imperative API: maps, markers,
//! line sources and layers addressed by engine handles. [`MapSurfaceAdapter`]
//! is the only thing that talks to it. It keys every primitive by
//! [`EntityId`] and keeps the engine handles to itself, which is what holds
//! the one-marker / one-layer per entity invariants together.

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{
    error::{BackendError, Error},
    geo::{EntityId, Position},
};

/// Engine handle of a map instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(pub u64);

/// Engine handle of a point marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub u64);

/// The host element a map is mounted into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Container(pub String);

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The view hosting a map; its container may appear some time after mount.
pub trait ViewHost {
    fn container(&self) -> Option<Container>;
}

impl ViewHost for Container {
    fn container(&self) -> Option<Container> {
        Some(self.clone())
    }
}

impl ViewHost for Option<Container> {
    fn container(&self) -> Option<Container> {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub center: Position,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanOptions {
    /// Zoom to settle on; `None` keeps the current zoom.
    pub zoom: Option<f64>,
    pub duration: Duration,
}

impl Default for PanOptions {
    fn default() -> Self {
        Self {
            zoom: None,
            duration: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineStyle {
    pub color: String,
    #[serde(default = "default_line_width")]
    pub width: f64,
}

fn default_line_width() -> f64 {
    4.0
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            color: "#3b82f6".to_string(),
            width: default_line_width(),
        }
    }
}

/// The map engine's imperative API.
pub trait MapBackend {
    fn create_map(&mut self, container: &Container, camera: Camera) -> Result<MapId, BackendError>;
    /// Whether the map finished loading its style and accepts sources and layers.
    fn is_loaded(&self, map: MapId) -> bool;
    fn remove_map(&mut self, map: MapId) -> Result<(), BackendError>;

    fn add_marker(
        &mut self,
        map: MapId,
        at: Position,
        label: &str,
    ) -> Result<MarkerId, BackendError>;
    fn move_marker(&mut self, map: MapId, marker: MarkerId, to: Position)
    -> Result<(), BackendError>;
    fn remove_marker(&mut self, map: MapId, marker: MarkerId) -> Result<(), BackendError>;

    fn add_line_source(&mut self, map: MapId, source: &str) -> Result<(), BackendError>;
    fn set_line_data(
        &mut self,
        map: MapId,
        source: &str,
        line: &[Position],
    ) -> Result<(), BackendError>;
    fn remove_source(&mut self, map: MapId, source: &str) -> Result<(), BackendError>;

    fn add_line_layer(
        &mut self,
        map: MapId,
        layer: &str,
        source: &str,
        style: &LineStyle,
    ) -> Result<(), BackendError>;
    fn remove_layer(&mut self, map: MapId, layer: &str) -> Result<(), BackendError>;

    fn ease_to(&mut self, map: MapId, center: Position, options: PanOptions)
    -> Result<(), BackendError>;
}

/// Token for one live surface. Stale tokens are rejected after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    map: MapId,
    generation: u64,
}

impl SurfaceHandle {
    pub fn map(&self) -> MapId {
        self.map
    }
}

/// Source id backing an entity's path layer.
pub fn path_source_id(id: &EntityId) -> String {
    format!("path-{id}")
}

/// Line layer id drawing an entity's path.
pub fn path_layer_id(id: &EntityId) -> String {
    format!("path-{id}-line")
}

#[derive(Debug)]
struct PathLayer {
    source: String,
    layer: String,
}

#[derive(Debug)]
struct Surface {
    handle: SurfaceHandle,
    markers: HashMap<EntityId, MarkerId>,
    layers: HashMap<EntityId, PathLayer>,
}

pub struct MapSurfaceAdapter<B> {
    backend: B,
    surface: Option<Surface>,
    generation: u64,
}

impl<B: MapBackend> MapSurfaceAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            surface: None,
            generation: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn handle(&self) -> Option<SurfaceHandle> {
        self.surface.as_ref().map(|s| s.handle)
    }

    pub fn is_live(&self, handle: SurfaceHandle) -> bool {
        self.handle() == Some(handle)
    }

    /// Whether the live surface has finished loading.
    pub fn is_ready(&self, handle: SurfaceHandle) -> bool {
        self.is_live(handle) && self.backend.is_loaded(handle.map)
    }

    pub fn has_marker(&self, id: &EntityId) -> bool {
        self.surface
            .as_ref()
            .is_some_and(|s| s.markers.contains_key(id))
    }

    pub fn has_path_layer(&self, id: &EntityId) -> bool {
        self.surface
            .as_ref()
            .is_some_and(|s| s.layers.contains_key(id))
    }

    pub fn marker_count(&self) -> usize {
        self.surface.as_ref().map_or(0, |s| s.markers.len())
    }

    pub fn layer_count(&self) -> usize {
        self.surface.as_ref().map_or(0, |s| s.layers.len())
    }

    fn surface_mut(&mut self, handle: SurfaceHandle) -> Result<&mut Surface, Error> {
        self.surface
            .as_mut()
            .filter(|s| s.handle == handle)
            .ok_or(Error::SurfaceNotReady)
    }

    /// Creates the surface, or returns the live one untouched.
    pub fn create_surface(
        &mut self,
        container: &Container,
        center: Position,
        zoom: f64,
    ) -> Result<SurfaceHandle, Error> {
        if let Some(surface) = &self.surface {
            debug!(%container, "surface already live, reusing");
            return Ok(surface.handle);
        }
        let map = self
            .backend
            .create_map(container, Camera { center, zoom })?;
        self.generation += 1;
        let handle = SurfaceHandle {
            map,
            generation: self.generation,
        };
        debug!(%container, %center, zoom, ?map, "created surface");
        self.surface = Some(Surface {
            handle,
            markers: HashMap::new(),
            layers: HashMap::new(),
        });
        Ok(handle)
    }

    /// Releases the surface with every marker and layer on it. Stale or
    /// repeated calls are no-ops; engine failures are logged and swallowed.
    pub fn destroy_surface(&mut self, handle: SurfaceHandle) {
        if !self.is_live(handle) {
            debug!(?handle, "surface already destroyed");
            return;
        }
        let Some(surface) = self.surface.take() else {
            return;
        };
        let map = surface.handle.map;
        for (id, marker) in surface.markers {
            if let Err(err) = self.backend.remove_marker(map, marker) {
                warn!(%err, entity = %id, "failed to remove marker during teardown");
            }
        }
        for (id, layer) in surface.layers {
            self.release_layer(map, &id, layer);
        }
        if let Err(err) = self.backend.remove_map(map) {
            warn!(%err, ?map, "failed to remove map during teardown");
        }
        debug!(?map, "destroyed surface");
    }

    /// Moves the entity's marker, creating it on first use.
    pub fn place_or_move_marker(
        &mut self,
        handle: SurfaceHandle,
        id: &EntityId,
        pos: Position,
        label: &str,
    ) -> Result<(), Error> {
        let map = handle.map;
        let surface = self.surface_mut(handle)?;
        if let Some(&marker) = surface.markers.get(id) {
            self.backend.move_marker(map, marker, pos)?;
            return Ok(());
        }
        let marker = self.backend.add_marker(map, pos, label)?;
        debug!(entity = %id, %pos, ?marker, "placed marker");
        // re-borrow; the backend call above needed `self.backend` mutably
        self.surface_mut(handle)?.markers.insert(id.clone(), marker);
        Ok(())
    }

    /// Releases the entity's marker if it has one.
    pub fn remove_marker(&mut self, handle: SurfaceHandle, id: &EntityId) {
        let Ok(surface) = self.surface_mut(handle) else {
            return;
        };
        let Some(marker) = surface.markers.remove(id) else {
            return;
        };
        if let Err(err) = self.backend.remove_marker(handle.map, marker) {
            warn!(%err, entity = %id, "failed to remove marker");
        }
    }

    /// Creates the entity's line source and layer unless both already exist.
    pub fn ensure_path_layer(
        &mut self,
        handle: SurfaceHandle,
        id: &EntityId,
        style: &LineStyle,
    ) -> Result<(), Error> {
        let map = handle.map;
        if self.surface_mut(handle)?.layers.contains_key(id) {
            return Ok(());
        }
        let source = path_source_id(id);
        let layer = path_layer_id(id);
        self.backend.add_line_source(map, &source)?;
        if let Err(err) = self.backend.add_line_layer(map, &layer, &source, style) {
            if let Err(err) = self.backend.remove_source(map, &source) {
                warn!(%err, entity = %id, "failed to roll back line source");
            }
            return Err(err.into());
        }
        debug!(entity = %id, %layer, "created path layer");
        self.surface_mut(handle)?
            .layers
            .insert(id.clone(), PathLayer { source, layer });
        Ok(())
    }

    /// Replaces the entity's path geometry. The layer must already exist.
    pub fn set_path_geometry(
        &mut self,
        handle: SurfaceHandle,
        id: &EntityId,
        positions: &[Position],
    ) -> Result<(), Error> {
        let surface = self.surface_mut(handle)?;
        let Some(source) = surface.layers.get(id).map(|l| l.source.clone()) else {
            error!(entity = %id, "path geometry set before the layer exists");
            return Err(Error::MissingLayer(id.clone()));
        };
        self.backend.set_line_data(handle.map, &source, positions)?;
        Ok(())
    }

    /// Releases the entity's line layer and source if present.
    pub fn remove_path_layer(&mut self, handle: SurfaceHandle, id: &EntityId) {
        let Ok(surface) = self.surface_mut(handle) else {
            return;
        };
        let Some(layer) = surface.layers.remove(id) else {
            return;
        };
        self.release_layer(handle.map, id, layer);
    }

    fn release_layer(&mut self, map: MapId, id: &EntityId, layer: PathLayer) {
        // layers reference their source, so they go first
        if let Err(err) = self.backend.remove_layer(map, &layer.layer) {
            warn!(%err, entity = %id, "failed to remove path layer");
        }
        if let Err(err) = self.backend.remove_source(map, &layer.source) {
            warn!(%err, entity = %id, "failed to remove path source");
        }
    }

    /// Starts a camera animation towards `center`. Returns before it completes.
    pub fn pan_to(
        &mut self,
        handle: SurfaceHandle,
        center: Position,
        options: PanOptions,
    ) -> Result<(), Error> {
        self.surface_mut(handle)?;
        self.backend.ease_to(handle.map, center, options)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn pos(lon: f64, lat: f64) -> Position {
        Position::new(lon, lat).unwrap()
    }

    fn adapter() -> (MapSurfaceAdapter<MemoryBackend>, SurfaceHandle) {
        let mut adapter = MapSurfaceAdapter::new(MemoryBackend::default());
        let handle = adapter
            .create_surface(&Container("map".into()), pos(-0.187, 5.6037), 14.0)
            .unwrap();
        (adapter, handle)
    }

    #[test]
    fn test_create_is_idempotent() {
        let (mut adapter, handle) = adapter();
        let again = adapter
            .create_surface(&Container("other".into()), pos(0.0, 0.0), 3.0)
            .unwrap();
        assert_eq!(handle, again);
        assert_eq!(adapter.backend().live_maps(), 1);
    }

    #[test]
    fn test_marker_is_moved_not_recreated() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("truck-1");
        adapter
            .place_or_move_marker(handle, &id, pos(0.0, 0.0), "Truck 1")
            .unwrap();
        adapter
            .place_or_move_marker(handle, &id, pos(1.0, 1.0), "Truck 1")
            .unwrap();
        let stats = adapter.backend().stats();
        assert_eq!(stats.markers_created, 1);
        assert_eq!(stats.markers_moved, 1);
        assert_eq!(adapter.marker_count(), 1);
        let map = adapter.backend().map(handle.map()).unwrap();
        assert_eq!(map.marker_by_label("Truck 1").unwrap().position, pos(1.0, 1.0));
    }

    #[test]
    fn test_remove_marker() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("truck-1");
        adapter.remove_marker(handle, &id);
        adapter
            .place_or_move_marker(handle, &id, pos(0.0, 0.0), "Truck 1")
            .unwrap();
        adapter.remove_marker(handle, &id);
        adapter.remove_marker(handle, &id);
        assert!(!adapter.has_marker(&id));
        assert_eq!(adapter.backend().map(handle.map()).unwrap().markers.len(), 0);

        // a fresh marker is created after explicit removal
        adapter
            .place_or_move_marker(handle, &id, pos(0.0, 0.0), "Truck 1")
            .unwrap();
        assert_eq!(adapter.backend().stats().markers_created, 2);
    }

    #[test]
    fn test_ensure_path_layer_is_idempotent() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("truck-1");
        let style = LineStyle::default();
        adapter.ensure_path_layer(handle, &id, &style).unwrap();
        adapter.ensure_path_layer(handle, &id, &style).unwrap();
        let stats = adapter.backend().stats();
        assert_eq!(stats.sources_created, 1);
        assert_eq!(stats.layers_created, 1);
        assert!(adapter.has_path_layer(&id));
    }

    #[test]
    fn test_geometry_requires_layer() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("truck-1");
        let line = [pos(0.0, 0.0), pos(1.0, 1.0)];
        assert!(matches!(
            adapter.set_path_geometry(handle, &id, &line),
            Err(Error::MissingLayer(_))
        ));
        adapter
            .ensure_path_layer(handle, &id, &LineStyle::default())
            .unwrap();
        adapter.set_path_geometry(handle, &id, &line).unwrap();
        let map = adapter.backend().map(handle.map()).unwrap();
        assert_eq!(map.line(&path_source_id(&id)).unwrap(), &line[..]);
    }

    #[test]
    fn test_operations_after_teardown() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("truck-1");
        adapter
            .ensure_path_layer(handle, &id, &LineStyle::default())
            .unwrap();
        adapter.destroy_surface(handle);
        adapter.destroy_surface(handle);
        assert!(matches!(
            adapter.set_path_geometry(handle, &id, &[pos(0.0, 0.0)]),
            Err(Error::SurfaceNotReady)
        ));
        assert!(matches!(
            adapter.place_or_move_marker(handle, &id, pos(0.0, 0.0), "x"),
            Err(Error::SurfaceNotReady)
        ));
        assert!(matches!(
            adapter.pan_to(handle, pos(0.0, 0.0), PanOptions::default()),
            Err(Error::SurfaceNotReady)
        ));
        adapter.remove_marker(handle, &id);
        adapter.remove_path_layer(handle, &id);
        assert_eq!(adapter.backend().live_maps(), 0);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let (mut adapter, old) = adapter();
        adapter.destroy_surface(old);
        let new = adapter
            .create_surface(&Container("map".into()), pos(0.0, 0.0), 10.0)
            .unwrap();
        assert_ne!(old, new);
        assert!(matches!(
            adapter.ensure_path_layer(old, &"a".into(), &LineStyle::default()),
            Err(Error::SurfaceNotReady)
        ));
        // destroying with the stale handle leaves the new surface alone
        adapter.destroy_surface(old);
        assert!(adapter.is_live(new));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (mut adapter, handle) = adapter();
        for name in ["a", "b", "c"] {
            let id = EntityId::from(name);
            adapter
                .place_or_move_marker(handle, &id, pos(0.0, 0.0), name)
                .unwrap();
            adapter
                .ensure_path_layer(handle, &id, &LineStyle::default())
                .unwrap();
        }
        adapter.destroy_surface(handle);
        let stats = adapter.backend().stats();
        assert_eq!(stats.markers_removed, 3);
        assert_eq!(stats.layers_removed, 3);
        assert_eq!(stats.sources_removed, 3);
        assert_eq!(adapter.backend().live_maps(), 0);
        assert_eq!(adapter.marker_count(), 0);
    }

    #[test]
    fn test_failed_layer_rolls_back_source() {
        let (mut adapter, handle) = adapter();
        let id = EntityId::from("a");
        // a foreign layer squatting on the id makes layer creation fail
        adapter
            .backend
            .add_line_source(handle.map(), "foreign")
            .unwrap();
        adapter
            .backend
            .add_line_layer(handle.map(), &path_layer_id(&id), "foreign", &LineStyle::default())
            .unwrap();
        assert!(matches!(
            adapter.ensure_path_layer(handle, &id, &LineStyle::default()),
            Err(Error::Backend(_))
        ));
        assert!(!adapter.has_path_layer(&id));
        let map = adapter.backend().map(handle.map()).unwrap();
        assert!(map.line(&path_source_id(&id)).is_none());
    }

    #[test]
    fn test_pan_to() {
        let (mut adapter, handle) = adapter();
        let options = PanOptions {
            zoom: Some(16.0),
            ..Default::default()
        };
        adapter.pan_to(handle, pos(1.0, 2.0), options).unwrap();
        let map = adapter.backend().map(handle.map()).unwrap();
        assert_eq!(map.camera.center, pos(1.0, 2.0));
        assert_eq!(map.camera.zoom, 16.0);
    }
}
