use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderableKind {
    Placeholder,
    Sprite(String),
}

/// Stable handle into an object's action table. Only meaningful together with
/// the object it was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub duration_ms: u32,
    pub moves: bool,
}

/// Prototype that instances are created from.
#[derive(Debug, Clone)]
pub struct Object {
    def_name: String,
    label: String,
    renderable: RenderableKind,
    actions: Vec<Action>,
    action_ids_by_name: HashMap<String, ActionId>,
    attributes: BTreeMap<String, String>,
}

impl Object {
    pub fn new(
        def_name: impl Into<String>,
        label: impl Into<String>,
        renderable: RenderableKind,
    ) -> Self {
        Self {
            def_name: def_name.into(),
            label: label.into(),
            renderable,
            actions: Vec::new(),
            action_ids_by_name: HashMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn def_name(&self) -> &str {
        &self.def_name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn renderable(&self) -> &RenderableKind {
        &self.renderable
    }

    /// Registers an action. Re-adding a name replaces the definition but keeps
    /// its id.
    pub fn add_action(&mut self, name: impl Into<String>, duration_ms: u32, moves: bool) -> ActionId {
        let name = name.into();
        if let Some(id) = self.action_ids_by_name.get(&name).copied() {
            if let Some(action) = self.actions.get_mut(id.0 as usize) {
                action.duration_ms = duration_ms;
                action.moves = moves;
            }
            return id;
        }

        let id = ActionId(self.actions.len() as u32);
        self.action_ids_by_name.insert(name.clone(), id);
        self.actions.push(Action {
            id,
            name,
            duration_ms,
            moves,
        });
        id
    }

    pub fn action_id_by_name(&self, name: &str) -> Option<ActionId> {
        self.action_ids_by_name.get(name).copied()
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(id.0 as usize)
    }

    pub fn action_by_name(&self, name: &str) -> Option<&Action> {
        self.action_id_by_name(name).and_then(|id| self.action(id))
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn default_action(&self) -> Option<&Action> {
        self.actions.first()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

#[derive(Debug, Default, Clone)]
pub struct ObjectRegistry {
    objects: Vec<Rc<Object>>,
    object_ids_by_name: HashMap<String, ObjectId>,
}

impl ObjectRegistry {
    /// Later objects with an already registered def name replace the earlier
    /// definition under the same id.
    pub fn from_objects(objects: Vec<Object>) -> Self {
        let mut registry = Self::default();
        for object in objects {
            registry.insert(object);
        }
        registry
    }

    pub fn insert(&mut self, object: Object) -> ObjectId {
        if let Some(id) = self.object_ids_by_name.get(object.def_name()).copied() {
            if let Some(slot) = self.objects.get_mut(id.0 as usize) {
                *slot = Rc::new(object);
            }
            return id;
        }
        let id = ObjectId(self.objects.len() as u32);
        self.object_ids_by_name
            .insert(object.def_name().to_string(), id);
        self.objects.push(Rc::new(object));
        id
    }

    pub fn object_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.object_ids_by_name.get(name).copied()
    }

    pub fn object(&self, id: ObjectId) -> Option<&Rc<Object>> {
        self.objects.get(id.0 as usize)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&Rc<Object>> {
        self.object_id_by_name(name).and_then(|id| self.object(id))
    }

    pub fn objects(&self) -> &[Rc<Object>] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ids_are_stable_across_redefinition() {
        let mut object = Object::new("proto.walker", "Walker", RenderableKind::Placeholder);
        let walk = object.add_action("walk", 0, true);
        let idle = object.add_action("idle", 500, false);
        let walk_again = object.add_action("walk", 250, true);

        assert_eq!(walk, walk_again);
        assert_ne!(walk, idle);
        assert_eq!(object.action(walk).expect("walk").duration_ms, 250);
        assert_eq!(object.default_action().expect("default").name, "walk");
    }

    #[test]
    fn registry_lookup_by_name_and_override() {
        let first = Object::new("proto.tree", "Tree", RenderableKind::Placeholder);
        let second = Object::new(
            "proto.tree",
            "Oak",
            RenderableKind::Sprite("oak.png".to_string()),
        );
        let rock = Object::new("proto.rock", "Rock", RenderableKind::Placeholder);
        let registry = ObjectRegistry::from_objects(vec![first, rock, second]);

        assert_eq!(registry.len(), 2);
        let tree = registry.object_by_name("proto.tree").expect("tree");
        assert_eq!(tree.label(), "Oak");
        assert_eq!(registry.object_id_by_name("proto.rock"), Some(ObjectId(1)));
        assert!(registry.object_by_name("proto.missing").is_none());
    }
}
