//! In-process [`MapBackend`] that keeps every primitive in memory.
//!
//! Behaves like a strict map engine: duplicate sources or layers, unknown
//! handles and removing a source still used by a layer are all errors.

use std::{cell::Cell, collections::HashMap};

use tracing::trace;

use crate::{
    error::BackendError,
    geo::Position,
    surface::{Camera, Container, LineStyle, MapBackend, MapId, MarkerId, PanOptions},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub maps_created: usize,
    pub maps_removed: usize,
    pub markers_created: usize,
    pub markers_moved: usize,
    pub markers_removed: usize,
    pub sources_created: usize,
    pub sources_removed: usize,
    pub layers_created: usize,
    pub layers_removed: usize,
    pub data_updates: usize,
    pub pans: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMarker {
    pub position: Position,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLayer {
    pub source: String,
    pub style: LineStyle,
}

#[derive(Debug)]
pub struct MemoryMap {
    pub container: Container,
    pub camera: Camera,
    pub markers: HashMap<MarkerId, MemoryMarker>,
    pub sources: HashMap<String, Vec<Position>>,
    pub layers: HashMap<String, MemoryLayer>,
    polls_until_loaded: Cell<u32>,
}

impl MemoryMap {
    pub fn marker_by_label(&self, label: &str) -> Option<&MemoryMarker> {
        self.markers.values().find(|m| m.label == label)
    }

    pub fn line(&self, source: &str) -> Option<&[Position]> {
        self.sources.get(source).map(Vec::as_slice)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    maps: HashMap<MapId, MemoryMap>,
    next_id: u64,
    load_polls: u32,
    stats: BackendStats,
}

impl MemoryBackend {
    /// Maps report loaded only after `polls` calls to [`MapBackend::is_loaded`].
    pub fn with_load_delay(polls: u32) -> Self {
        Self {
            load_polls: polls,
            ..Default::default()
        }
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }

    pub fn live_maps(&self) -> usize {
        self.maps.len()
    }

    pub fn map(&self, map: MapId) -> Option<&MemoryMap> {
        self.maps.get(&map)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn map_mut(&mut self, map: MapId) -> Result<&mut MemoryMap, BackendError> {
        self.maps
            .get_mut(&map)
            .ok_or_else(|| BackendError::new(format!("unknown map {}", map.0)))
    }
}

impl MapBackend for MemoryBackend {
    fn create_map(&mut self, container: &Container, camera: Camera) -> Result<MapId, BackendError> {
        let id = MapId(self.next_id());
        self.maps.insert(
            id,
            MemoryMap {
                container: container.clone(),
                camera,
                markers: HashMap::new(),
                sources: HashMap::new(),
                layers: HashMap::new(),
                polls_until_loaded: Cell::new(self.load_polls),
            },
        );
        self.stats.maps_created += 1;
        trace!(map = id.0, %container, "create map");
        Ok(id)
    }

    fn is_loaded(&self, map: MapId) -> bool {
        let Some(map) = self.maps.get(&map) else {
            return false;
        };
        let remaining = map.polls_until_loaded.get();
        if remaining == 0 {
            return true;
        }
        map.polls_until_loaded.set(remaining - 1);
        false
    }

    fn remove_map(&mut self, map: MapId) -> Result<(), BackendError> {
        self.maps
            .remove(&map)
            .ok_or_else(|| BackendError::new(format!("unknown map {}", map.0)))?;
        self.stats.maps_removed += 1;
        trace!(map = map.0, "remove map");
        Ok(())
    }

    fn add_marker(
        &mut self,
        map: MapId,
        at: Position,
        label: &str,
    ) -> Result<MarkerId, BackendError> {
        let id = MarkerId(self.next_id());
        self.map_mut(map)?.markers.insert(
            id,
            MemoryMarker {
                position: at,
                label: label.to_string(),
            },
        );
        self.stats.markers_created += 1;
        trace!(map = map.0, marker = id.0, %at, label, "add marker");
        Ok(id)
    }

    fn move_marker(
        &mut self,
        map: MapId,
        marker: MarkerId,
        to: Position,
    ) -> Result<(), BackendError> {
        let entry = self
            .map_mut(map)?
            .markers
            .get_mut(&marker)
            .ok_or_else(|| BackendError::new(format!("unknown marker {}", marker.0)))?;
        entry.position = to;
        self.stats.markers_moved += 1;
        trace!(map = map.0, marker = marker.0, %to, "move marker");
        Ok(())
    }

    fn remove_marker(&mut self, map: MapId, marker: MarkerId) -> Result<(), BackendError> {
        self.map_mut(map)?
            .markers
            .remove(&marker)
            .ok_or_else(|| BackendError::new(format!("unknown marker {}", marker.0)))?;
        self.stats.markers_removed += 1;
        trace!(map = map.0, marker = marker.0, "remove marker");
        Ok(())
    }

    fn add_line_source(&mut self, map: MapId, source: &str) -> Result<(), BackendError> {
        let m = self.map_mut(map)?;
        if m.sources.contains_key(source) {
            return Err(BackendError::new(format!("source {source} already exists")));
        }
        m.sources.insert(source.to_string(), Vec::new());
        self.stats.sources_created += 1;
        trace!(map = map.0, source, "add source");
        Ok(())
    }

    fn set_line_data(
        &mut self,
        map: MapId,
        source: &str,
        line: &[Position],
    ) -> Result<(), BackendError> {
        let data = self
            .map_mut(map)?
            .sources
            .get_mut(source)
            .ok_or_else(|| BackendError::new(format!("unknown source {source}")))?;
        data.clear();
        data.extend_from_slice(line);
        self.stats.data_updates += 1;
        trace!(map = map.0, source, points = line.len(), "set line data");
        Ok(())
    }

    fn remove_source(&mut self, map: MapId, source: &str) -> Result<(), BackendError> {
        let m = self.map_mut(map)?;
        if let Some((layer, _)) = m.layers.iter().find(|(_, l)| l.source == source) {
            return Err(BackendError::new(format!(
                "source {source} is still used by layer {layer}"
            )));
        }
        m.sources
            .remove(source)
            .ok_or_else(|| BackendError::new(format!("unknown source {source}")))?;
        self.stats.sources_removed += 1;
        trace!(map = map.0, source, "remove source");
        Ok(())
    }

    fn add_line_layer(
        &mut self,
        map: MapId,
        layer: &str,
        source: &str,
        style: &LineStyle,
    ) -> Result<(), BackendError> {
        let m = self.map_mut(map)?;
        if m.layers.contains_key(layer) {
            return Err(BackendError::new(format!("layer {layer} already exists")));
        }
        if !m.sources.contains_key(source) {
            return Err(BackendError::new(format!("unknown source {source}")));
        }
        m.layers.insert(
            layer.to_string(),
            MemoryLayer {
                source: source.to_string(),
                style: style.clone(),
            },
        );
        self.stats.layers_created += 1;
        trace!(map = map.0, layer, source, color = %style.color, "add line layer");
        Ok(())
    }

    fn remove_layer(&mut self, map: MapId, layer: &str) -> Result<(), BackendError> {
        self.map_mut(map)?
            .layers
            .remove(layer)
            .ok_or_else(|| BackendError::new(format!("unknown layer {layer}")))?;
        self.stats.layers_removed += 1;
        trace!(map = map.0, layer, "remove layer");
        Ok(())
    }

    fn ease_to(
        &mut self,
        map: MapId,
        center: Position,
        options: PanOptions,
    ) -> Result<(), BackendError> {
        let m = self.map_mut(map)?;
        // animation is instantaneous here
        m.camera.center = center;
        if let Some(zoom) = options.zoom {
            m.camera.zoom = zoom;
        }
        self.stats.pans += 1;
        trace!(map = map.0, %center, ?options, "ease to");
        Ok(())
    }
}
