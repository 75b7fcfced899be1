//! Layer visibility overrides.
//!
//! A selection pass records every layer's active flag before changing
//! anything, so the original state can always be restored with
//! [`MapHandle::reset_layers`]. Only one snapshot is ever held: selecting
//! again before a reset keeps the first one.

use log::{debug, warn};
use std::collections::HashSet;

use crate::engine::RenderEngine;
use crate::map::MapHandle;
use crate::{Error, Result};

/// Whether a layer should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerStatus {
    /// Force the layer on
    Include,
    /// Force the layer off
    Exclude,
    /// Leave the layer's current flag alone
    Default,
}

/// Decides, per layer name, whether the layer takes part in rendering.
///
/// Any `FnMut(&str) -> LayerStatus` closure is a selector. Implement the
/// trait directly when selection can fail.
pub trait LayerSelector {
    fn select(&mut self, layer_name: &str) -> Result<LayerStatus>;
}

impl<F> LayerSelector for F
where
    F: FnMut(&str) -> LayerStatus,
{
    fn select(&mut self, layer_name: &str) -> Result<LayerStatus> {
        Ok(self(layer_name))
    }
}

/// A table-driven selector: named layers are included or excluded, everything
/// else gets the fallback status.
///
/// # Examples
///
/// ```
/// use rfmap::{LayerPolicy, LayerSelector, LayerStatus};
///
/// let mut policy = LayerPolicy::new().include("roads").exclude("labels");
/// assert_eq!(policy.select("roads").unwrap(), LayerStatus::Include);
/// assert_eq!(policy.select("water").unwrap(), LayerStatus::Default);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerPolicy {
    include: HashSet<String>,
    exclude: HashSet<String>,
    fallback: Option<LayerStatus>,
}

impl LayerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render only the named layers
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: names.into_iter().map(Into::into).collect(),
            exclude: HashSet::new(),
            fallback: Some(LayerStatus::Exclude),
        }
    }

    pub fn include(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.exclude.remove(&name);
        self.include.insert(name);
        self
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.include.remove(&name);
        self.exclude.insert(name);
        self
    }

    /// Status for layers not named in the policy (defaults to `Default`)
    pub fn otherwise(mut self, status: LayerStatus) -> Self {
        self.fallback = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.fallback.is_none()
    }

    fn status_for(&self, layer_name: &str) -> LayerStatus {
        if self.include.contains(layer_name) {
            LayerStatus::Include
        } else if self.exclude.contains(layer_name) {
            LayerStatus::Exclude
        } else {
            self.fallback.unwrap_or(LayerStatus::Default)
        }
    }
}

impl LayerSelector for LayerPolicy {
    fn select(&mut self, layer_name: &str) -> Result<LayerStatus> {
        Ok(self.status_for(layer_name))
    }
}

/// Active flags of every layer, by layer position, at capture time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSnapshot(Vec<bool>);

impl LayerSnapshot {
    fn capture<E: RenderEngine>(engine: &E) -> Self {
        Self(current_flags(engine))
    }

    pub fn flags(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Snapshot/apply/restore state for one map handle
#[derive(Debug, Default)]
pub(crate) struct LayerVisibility {
    snapshot: Option<LayerSnapshot>,
}

impl LayerVisibility {
    pub(crate) fn is_held(&self) -> bool {
        self.snapshot.is_some()
    }

    pub(crate) fn held(&self) -> Option<&LayerSnapshot> {
        self.snapshot.as_ref()
    }

    /// Capture the flags unless a snapshot is already held
    pub(crate) fn snapshot<E: RenderEngine>(&mut self, engine: &E) {
        if self.snapshot.is_some() {
            return;
        }
        let snap = LayerSnapshot::capture(engine);
        debug!("captured layer snapshot of {} layers", snap.len());
        self.snapshot = Some(snap);
    }

    /// Run `selector` over every layer. Layers updated before a selector
    /// failure stay updated; the snapshot taken first allows a full restore.
    pub(crate) fn apply<E, S>(&mut self, engine: &mut E, selector: &mut S) -> Result<()>
    where
        E: RenderEngine,
        S: LayerSelector + ?Sized,
    {
        self.snapshot(engine);
        for i in 0..engine.layer_count() {
            let name = engine.layer_name(i).unwrap_or_default().to_string();
            match selector.select(&name)? {
                LayerStatus::Include => engine.set_layer_active(i, true),
                LayerStatus::Exclude => engine.set_layer_active(i, false),
                LayerStatus::Default => {}
            }
        }
        Ok(())
    }

    /// Reapply the held snapshot by position and drop it.
    ///
    /// Returns `false` when nothing was restored: either no snapshot is held
    /// or the map now has more layers than were captured, in which case the
    /// snapshot is kept.
    pub(crate) fn restore<E: RenderEngine>(&mut self, engine: &mut E) -> bool {
        let Some(snap) = &self.snapshot else {
            return false;
        };
        let count = engine.layer_count();
        if count > snap.len() {
            warn!(
                "layer count grew from {} to {} since the snapshot; not restoring",
                snap.len(),
                count
            );
            return false;
        }
        for (i, active) in snap.flags().iter().take(count).enumerate() {
            engine.set_layer_active(i, *active);
        }
        self.snapshot = None;
        debug!("restored layer flags for {} layers", count);
        true
    }
}

fn current_flags<E: RenderEngine>(engine: &E) -> Vec<bool> {
    (0..engine.layer_count())
        .map(|i| engine.layer_is_active(i))
        .collect()
}

impl<E: RenderEngine> MapHandle<E> {
    /// Enable/disable layers. The selector is called once per layer, in
    /// layer order. The flags in effect before the first selection are kept
    /// so [`MapHandle::reset_layers`] can restore them.
    pub fn select_layers<S>(&mut self, mut selector: S) -> Result<()>
    where
        S: LayerSelector,
    {
        let engine = self.engine.as_mut().ok_or(Error::ResourceError)?;
        self.layers.apply(engine, &mut selector)
    }

    /// Like [`MapHandle::select_layers`] for a selector behind a reference or
    /// a trait object
    pub fn select_layers_with(&mut self, selector: &mut dyn LayerSelector) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::ResourceError)?;
        self.layers.apply(engine, selector)
    }

    /// Reset all layers to the flags recorded before the first selection.
    /// Without an active override this does nothing.
    pub fn reset_layers(&mut self) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::ResourceError)?;
        self.layers.restore(engine);
        Ok(())
    }

    /// Record the current flags without changing any layer. Does nothing if
    /// an override is already active.
    pub fn store_layers(&mut self) -> Result<()> {
        let engine = self.engine.as_ref().ok_or(Error::ResourceError)?;
        self.layers.snapshot(engine);
        Ok(())
    }

    /// The flags recorded by the active override, if any
    pub fn stored_layers(&self) -> Result<Option<&LayerSnapshot>> {
        self.engine()?;
        Ok(self.layers.held())
    }

    /// Current active flag of every layer, in layer order
    pub fn layer_flags(&self) -> Result<Vec<bool>> {
        Ok(current_flags(self.engine()?))
    }

    /// Name and active flag of every layer, in layer order
    pub fn layers(&self) -> Result<Vec<(String, bool)>> {
        let engine = self.engine()?;
        Ok((0..engine.layer_count())
            .map(|i| {
                (
                    engine.layer_name(i).unwrap_or_default().to_string(),
                    engine.layer_is_active(i),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;
    use crate::MapConfig;

    fn four_layer_map() -> MapHandle<MockEngine> {
        let mut map = MapHandle::new(MapConfig::default()).unwrap();
        map.load_string("layers: layerA, layerB, layerC, !layerD", None)
            .unwrap();
        map
    }

    fn a_off_b_on(name: &str) -> LayerStatus {
        match name {
            "layerA" => LayerStatus::Exclude,
            "layerB" => LayerStatus::Include,
            _ => LayerStatus::Default,
        }
    }

    #[test]
    fn no_snapshot_by_default() {
        let map = four_layer_map();
        assert!(map.stored_layers().unwrap().is_none());
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn store_then_reset_is_identity() {
        let mut map = four_layer_map();
        map.store_layers().unwrap();
        assert_eq!(
            map.stored_layers().unwrap().unwrap().flags(),
            &[true, true, true, false]
        );
        map.reset_layers().unwrap();
        assert!(map.stored_layers().unwrap().is_none());
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn select_and_reset_scenario() {
        let mut map = four_layer_map();
        map.select_layers(a_off_b_on).unwrap();
        assert_eq!(
            map.stored_layers().unwrap().unwrap().flags(),
            &[true, true, true, false]
        );
        assert_eq!(map.layer_flags().unwrap(), vec![false, true, true, false]);

        map.reset_layers().unwrap();
        assert!(map.stored_layers().unwrap().is_none());
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn nested_selection_keeps_first_snapshot() {
        let mut map = four_layer_map();
        map.select_layers(a_off_b_on).unwrap();
        map.select_layers(LayerPolicy::new().include("layerD").exclude("layerC"))
            .unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![false, true, false, true]);
        assert_eq!(
            map.stored_layers().unwrap().unwrap().flags(),
            &[true, true, true, false]
        );
        map.reset_layers().unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn all_default_policy_changes_nothing() {
        let mut map = four_layer_map();
        map.select_layers(|_: &str| LayerStatus::Default).unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
        map.reset_layers().unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn only_policy_excludes_the_rest() {
        let mut map = four_layer_map();
        map.select_layers(LayerPolicy::only(["layerD"])).unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![false, false, false, true]);
    }

    #[test]
    fn reset_without_snapshot_is_noop() {
        let mut map = four_layer_map();
        map.engine_mut().unwrap().set_layer_active(0, false);
        map.reset_layers().unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![false, true, true, false]);
    }

    #[test]
    fn reset_aborts_when_layers_were_added() {
        let mut map = four_layer_map();
        map.select_layers(a_off_b_on).unwrap();
        map.engine_mut().unwrap().push_layer("layerE", true);

        map.reset_layers().unwrap();
        assert_eq!(
            map.layer_flags().unwrap(),
            vec![false, true, true, false, true]
        );
        assert_eq!(
            map.stored_layers().unwrap().unwrap().flags(),
            &[true, true, true, false]
        );
    }

    #[test]
    fn reset_with_fewer_layers_restores_by_position() {
        let mut map = four_layer_map();
        map.select_layers(|_: &str| LayerStatus::Exclude).unwrap();
        map.load_string("layers: !x, !y", None).unwrap();
        map.reset_layers().unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![true, true]);
        assert!(map.stored_layers().unwrap().is_none());
    }

    struct FailOn(&'static str, Vec<String>);

    impl LayerSelector for FailOn {
        fn select(&mut self, layer_name: &str) -> Result<LayerStatus> {
            self.1.push(layer_name.to_string());
            if layer_name == self.0 {
                return Err(Error::SelectorError {
                    layer: layer_name.to_string(),
                    reason: "lookup failed".into(),
                });
            }
            Ok(LayerStatus::Exclude)
        }
    }

    #[test]
    fn failing_selector_leaves_partial_state_and_snapshot() {
        let mut map = four_layer_map();
        let mut selector = FailOn("layerC", Vec::new());
        let err = map.select_layers_with(&mut selector).unwrap_err();
        assert!(matches!(err, Error::SelectorError { .. }));
        assert_eq!(selector.1, vec!["layerA", "layerB", "layerC"]);
        assert_eq!(map.layer_flags().unwrap(), vec![false, false, true, false]);

        map.reset_layers().unwrap();
        assert_eq!(map.layer_flags().unwrap(), vec![true, true, true, false]);
    }

    #[test]
    fn layers_lists_names_and_flags() {
        let map = four_layer_map();
        let layers = map.layers().unwrap();
        assert_eq!(layers[0], ("layerA".to_string(), true));
        assert_eq!(layers[3], ("layerD".to_string(), false));
    }

    #[test]
    fn snapshot_of_zero_layers_is_still_held() {
        let mut map: MapHandle<MockEngine> = MapHandle::new(MapConfig::default()).unwrap();
        map.store_layers().unwrap();
        let snap = map.stored_layers().unwrap().unwrap();
        assert!(snap.is_empty());
        map.reset_layers().unwrap();
        assert!(map.stored_layers().unwrap().is_none());
    }

    #[test]
    fn policy_include_overrides_earlier_exclude() {
        let mut policy = LayerPolicy::new().exclude("a").include("a");
        assert_eq!(policy.select("a").unwrap(), LayerStatus::Include);
        assert!(!policy.is_empty());
        assert!(LayerPolicy::new().is_empty());
    }
}
