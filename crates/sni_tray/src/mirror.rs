use crate::ItemState;

/// The items a [`Host`][crate::Host] currently knows about, in the order they appeared.
#[derive(Debug, Default, Clone)]
pub struct ItemMirror {
    items: Vec<ItemState>,
}

impl ItemMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.get(service).is_some()
    }

    pub fn get(&self, service: &str) -> Option<&ItemState> {
        self.items.iter().find(|item| item.service == service)
    }

    pub fn get_mut(&mut self, service: &str) -> Option<&mut ItemState> {
        self.items.iter_mut().find(|item| item.service == service)
    }

    /// Add an item. Returns `false`, leaving the mirror untouched, if an item with the same
    /// identity is already present.
    pub fn insert(&mut self, item: ItemState) -> bool {
        if self.contains(&item.service) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn remove(&mut self, service: &str) -> Option<ItemState> {
        let idx = self.items.iter().position(|item| item.service == service)?;
        Some(self.items.remove(idx))
    }

    /// Identities of mirrored items that are missing from `registered`.
    pub fn stale(&self, registered: &[String]) -> Vec<String> {
        self.items.iter().filter(|item| !registered.contains(&item.service)).map(|item| item.service.clone()).collect()
    }

    pub fn services(&self) -> Vec<String> {
        self.items.iter().map(|item| item.service.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemState> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
