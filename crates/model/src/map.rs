use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::instance::{Instance, InstanceChangeInfo, InstanceRef};
use crate::location::{LayerId, Location, Point};
use crate::object::{Object, ObjectRegistry};
use crate::time::{TimeHierarchy, TimeProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown map id {0}")]
    UnknownMap(u32),
    #[error("unknown layer id {0}")]
    UnknownLayer(u32),
    #[error("map '{map}' already has a layer named '{layer}'")]
    DuplicateLayer { map: String, layer: String },
    #[error("unknown object '{0}'")]
    UnknownObject(String),
}

/// Maps each layer to the clock of the map that owns it.
#[derive(Debug, Default)]
struct LayerClocks {
    providers: RefCell<HashMap<LayerId, Rc<TimeProvider>>>,
}

impl LayerClocks {
    fn register(&self, layer: LayerId, provider: Rc<TimeProvider>) {
        self.providers.borrow_mut().insert(layer, provider);
    }
}

impl TimeHierarchy for LayerClocks {
    fn provider_for(&self, location: &Location) -> Option<Rc<TimeProvider>> {
        self.providers.borrow().get(&location.layer()).cloned()
    }
}

#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    name: String,
    instances: Vec<InstanceRef>,
}

impl Layer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instances(&self) -> &[InstanceRef] {
        &self.instances
    }
}

#[derive(Debug)]
pub struct Map {
    id: MapId,
    name: String,
    time_provider: Rc<TimeProvider>,
    layers: Vec<Layer>,
}

impl Map {
    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn time_provider(&self) -> &Rc<TimeProvider> {
        &self.time_provider
    }

    pub fn set_time_multiplier(&self, multiplier: f32) {
        self.time_provider.set_multiplier(multiplier);
    }

    pub fn time_multiplier(&self) -> f32 {
        self.time_provider.multiplier()
    }
}

#[derive(Debug, Clone)]
pub struct InstanceChange {
    pub instance: InstanceRef,
    pub info: InstanceChangeInfo,
}

/// Owner of maps, layers and instances, and root of the time hierarchy.
#[derive(Debug)]
pub struct Model {
    objects: ObjectRegistry,
    time_provider: Rc<TimeProvider>,
    clocks: Rc<LayerClocks>,
    maps: Vec<Map>,
    next_layer_id: u32,
}

impl Model {
    pub fn new(objects: ObjectRegistry) -> Self {
        Self {
            objects,
            time_provider: Rc::new(TimeProvider::root()),
            clocks: Rc::new(LayerClocks::default()),
            maps: Vec::new(),
            next_layer_id: 0,
        }
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn time_provider(&self) -> &Rc<TimeProvider> {
        &self.time_provider
    }

    pub fn set_time_multiplier(&self, multiplier: f32) {
        self.time_provider.set_multiplier(multiplier);
    }

    pub fn time_multiplier(&self) -> f32 {
        self.time_provider.multiplier()
    }

    pub fn ticks(&self) -> u32 {
        self.time_provider.ticks()
    }

    pub fn create_map(&mut self, name: impl Into<String>) -> MapId {
        let id = MapId(self.maps.len() as u32);
        self.maps.push(Map {
            id,
            name: name.into(),
            time_provider: Rc::new(TimeProvider::with_master(Some(Rc::clone(
                &self.time_provider,
            )))),
            layers: Vec::new(),
        });
        id
    }

    pub fn maps(&self) -> &[Map] {
        &self.maps
    }

    pub fn map(&self, id: MapId) -> Option<&Map> {
        self.maps.get(id.0 as usize)
    }

    pub fn create_layer(
        &mut self,
        map_id: MapId,
        name: impl Into<String>,
    ) -> Result<LayerId, ModelError> {
        let name = name.into();
        let id = LayerId(self.next_layer_id);
        let map = self
            .maps
            .get_mut(map_id.0 as usize)
            .ok_or(ModelError::UnknownMap(map_id.0))?;
        if map.layers.iter().any(|layer| layer.name == name) {
            return Err(ModelError::DuplicateLayer {
                map: map.name.clone(),
                layer: name,
            });
        }

        self.clocks.register(id, Rc::clone(&map.time_provider));
        map.layers.push(Layer {
            id,
            name,
            instances: Vec::new(),
        });
        self.next_layer_id = self.next_layer_id.saturating_add(1);
        Ok(id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.maps
            .iter()
            .flat_map(|map| map.layers.iter())
            .find(|layer| layer.id == id)
    }

    pub fn create_instance(
        &mut self,
        layer: LayerId,
        object_name: &str,
        position: Point,
        identifier: impl Into<String>,
    ) -> Result<InstanceRef, ModelError> {
        let object = self
            .objects
            .object_by_name(object_name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownObject(object_name.to_string()))?;
        self.create_instance_from(layer, object, position, identifier)
    }

    pub fn create_instance_from(
        &mut self,
        layer: LayerId,
        object: Rc<Object>,
        position: Point,
        identifier: impl Into<String>,
    ) -> Result<InstanceRef, ModelError> {
        let time: Rc<dyn TimeHierarchy> = self.clocks.clone();
        let target = self
            .layer_mut(layer)
            .ok_or(ModelError::UnknownLayer(layer.0))?;
        let instance = Rc::new(RefCell::new(Instance::new(
            object,
            Location::new(layer, position),
            identifier,
            time,
        )));
        target.instances.push(Rc::clone(&instance));
        Ok(instance)
    }

    /// Detaches the instance from its layer, marks it removed and drops its
    /// visual. Returns false when the instance does not belong to this model.
    pub fn remove_instance(&mut self, instance: &InstanceRef) -> bool {
        for layer in self.maps.iter_mut().flat_map(|map| map.layers.iter_mut()) {
            let Some(index) = layer
                .instances
                .iter()
                .position(|candidate| Rc::ptr_eq(candidate, instance))
            else {
                continue;
            };
            let removed = layer.instances.remove(index);
            match removed.try_borrow_mut() {
                Ok(mut removed) => {
                    removed.mark_removed();
                    removed.take_visual();
                    debug!(instance = %removed.id(), layer = %layer.name, "instance_removed");
                }
                Err(_) => warn!(layer = %layer.name, "instance_removed_while_borrowed"),
            }
            return true;
        }
        false
    }

    pub fn find_instance(&self, identifier: &str) -> Option<InstanceRef> {
        self.instances()
            .find(|instance| {
                instance
                    .try_borrow()
                    .is_ok_and(|instance| instance.id() == identifier)
            })
            .cloned()
    }

    pub fn instances(&self) -> impl Iterator<Item = &InstanceRef> {
        self.maps
            .iter()
            .flat_map(|map| map.layers.iter())
            .flat_map(|layer| layer.instances.iter())
    }

    pub fn instance_count(&self) -> usize {
        self.instances().count()
    }

    /// Advances the model clock to `curticks` and updates every instance
    /// once. Only instances that changed are reported.
    pub fn update(&self, curticks: u32) -> Vec<InstanceChange> {
        self.time_provider.advance_to(curticks);
        let mut changes = Vec::new();
        for layer in self.maps.iter().flat_map(|map| map.layers.iter()) {
            for instance in &layer.instances {
                let info = match instance.try_borrow_mut() {
                    Ok(mut instance) => instance.update(curticks),
                    Err(_) => {
                        warn!(layer = %layer.name, curticks, "instance_update_reentrant");
                        continue;
                    }
                };
                if !info.is_empty() {
                    changes.push(InstanceChange {
                        instance: Rc::clone(instance),
                        info,
                    });
                }
            }
        }
        changes
    }

    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.maps
            .iter_mut()
            .flat_map(|map| map.layers.iter_mut())
            .find(|layer| layer.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::RenderableKind;

    fn model_with_walker() -> Model {
        let mut walker = Object::new("proto.walker", "Walker", RenderableKind::Placeholder);
        walker.add_action("walk", 0, true);
        Model::new(ObjectRegistry::from_objects(vec![walker]))
    }

    #[test]
    fn layers_need_an_existing_map_and_unique_names() {
        let mut model = model_with_walker();
        assert_eq!(
            model.create_layer(MapId(3), "ground"),
            Err(ModelError::UnknownMap(3))
        );

        let map = model.create_map("town");
        let ground = model.create_layer(map, "ground").expect("ground");
        let roof = model.create_layer(map, "roof").expect("roof");
        assert_ne!(ground, roof);
        assert!(matches!(
            model.create_layer(map, "ground"),
            Err(ModelError::DuplicateLayer { .. })
        ));
        assert_eq!(model.layer(roof).expect("roof").name(), "roof");
    }

    #[test]
    fn create_instance_validates_layer_and_object() {
        let mut model = model_with_walker();
        let map = model.create_map("town");
        let ground = model.create_layer(map, "ground").expect("ground");

        assert!(matches!(
            model.create_instance(LayerId(42), "proto.walker", Point::default(), "a"),
            Err(ModelError::UnknownLayer(42))
        ));
        assert!(matches!(
            model.create_instance(ground, "proto.ghost", Point::default(), "a"),
            Err(ModelError::UnknownObject(_))
        ));

        let hero = model
            .create_instance(ground, "proto.walker", Point::new(1.0, 2.0), "hero")
            .expect("hero");
        assert_eq!(hero.borrow().location().layer(), ground);
        assert_eq!(model.instance_count(), 1);
        assert!(Rc::ptr_eq(
            &model.find_instance("hero").expect("find"),
            &hero
        ));
    }

    #[test]
    fn update_reports_only_changed_instances() {
        let mut model = model_with_walker();
        let map = model.create_map("town");
        let ground = model.create_layer(map, "ground").expect("ground");
        let mover = model
            .create_instance(ground, "proto.walker", Point::new(0.0, 0.0), "mover")
            .expect("mover");
        let tile = model
            .create_instance(ground, "proto.walker", Point::new(5.0, 5.0), "tile")
            .expect("tile");

        mover
            .borrow_mut()
            .move_to("walk", Location::new(ground, Point::new(4.0, 0.0)), 1.0)
            .expect("move");

        let changes = model.update(1_000);
        assert_eq!(changes.len(), 1);
        assert!(Rc::ptr_eq(&changes[0].instance, &mover));
        assert!(changes[0].info.contains(InstanceChangeInfo::LOCATION));
        assert!(!tile.borrow().has_activity());
        assert_eq!(model.ticks(), 1_000);
    }

    #[test]
    fn instances_run_under_their_maps_clock() {
        let mut model = model_with_walker();
        let fast_map = model.create_map("fast");
        let slow_map = model.create_map("slow");
        let fast_layer = model.create_layer(fast_map, "ground").expect("fast");
        let slow_layer = model.create_layer(slow_map, "ground").expect("slow");
        model.set_time_multiplier(2.0);
        model.map(slow_map).expect("slow").set_time_multiplier(0.25);

        let fast = model
            .create_instance(fast_layer, "proto.walker", Point::default(), "fast")
            .expect("fast");
        let slow = model
            .create_instance(slow_layer, "proto.walker", Point::default(), "slow")
            .expect("slow");
        assert_eq!(fast.borrow().total_time_multiplier(), 2.0);
        assert_eq!(slow.borrow().total_time_multiplier(), 0.5);

        slow.borrow_mut().set_location(Location::new(fast_layer, Point::default()));
        assert_eq!(slow.borrow().total_time_multiplier(), 2.0);
    }

    #[test]
    fn remove_instance_detaches_and_drops_visual() {
        let mut model = model_with_walker();
        let map = model.create_map("town");
        let ground = model.create_layer(map, "ground").expect("ground");
        let hero = model
            .create_instance(ground, "proto.walker", Point::default(), "hero")
            .expect("hero");
        hero.borrow_mut().set_visual(String::from("sprite handle"));

        assert!(model.remove_instance(&hero));
        assert!(!model.remove_instance(&hero));
        assert_eq!(model.instance_count(), 0);
        assert!(hero.borrow().visual::<String>().is_none());
    }

    #[test]
    fn follower_goes_idle_once_leader_is_removed() {
        let mut model = model_with_walker();
        let map = model.create_map("town");
        let ground = model.create_layer(map, "ground").expect("ground");
        let leader = model
            .create_instance(ground, "proto.walker", Point::new(10.0, 0.0), "leader")
            .expect("leader");
        let follower = model
            .create_instance(ground, "proto.walker", Point::new(0.0, 0.0), "follower")
            .expect("follower");

        follower
            .borrow_mut()
            .follow("walk", &leader, 1.0)
            .expect("follow");
        model.update(1_000);
        assert!((follower.borrow().location().position().x - 1.0).abs() < 1e-9);

        assert!(model.remove_instance(&leader));
        assert!(leader.borrow().is_removed());
        let changes = model.update(2_000);
        let follower_ref = follower.borrow();
        assert_eq!(follower_ref.current_action(), None);
        assert!((follower_ref.location().position().x - 1.0).abs() < 1e-9);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].info.contains(InstanceChangeInfo::ACTION));
    }

    #[test]
    fn refresh_rebinds_clock_after_in_place_layer_change() {
        let mut model = model_with_walker();
        let town = model.create_map("town");
        let cellar = model.create_map("cellar");
        let ground = model.create_layer(town, "ground").expect("ground");
        let vault = model.create_layer(cellar, "vault").expect("vault");
        model.map(cellar).expect("cellar").set_time_multiplier(0.5);

        let hero = model
            .create_instance(ground, "proto.walker", Point::new(1.0, 1.0), "hero")
            .expect("hero");
        hero.borrow_mut().say("hello", 0);
        model.update(0);

        hero.borrow_mut().location_mut().set_layer(vault);
        assert_eq!(hero.borrow().total_time_multiplier(), 1.0);

        hero.borrow_mut().refresh();
        assert_eq!(hero.borrow().total_time_multiplier(), 0.5);

        let changes = model.update(100);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].info.contains(InstanceChangeInfo::LOCATION));
        assert!(hero.borrow().change_info().contains(InstanceChangeInfo::LOCATION));
    }
}
