use crate::{HostIdentity, ItemIdentity};

/// Counter value handed out with every registration.
///
/// A liveness watch only removes the registration whose generation it was started for, so a
/// watch that fires late can never remove a newer registration of the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug)]
struct Registration<T> {
    key: T,
    generation: Generation,
}

/// Items and hosts known to a [`Watcher`][crate::Watcher], in registration order.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    items: Vec<Registration<ItemIdentity>>,
    hosts: Vec<Registration<HostIdentity>>,
    next_generation: u64,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> Generation {
        self.next_generation += 1;
        Generation(self.next_generation)
    }

    /// Add an item. Returns `None` if the identity is already registered.
    pub fn add_item(&mut self, item: ItemIdentity) -> Option<Generation> {
        if self.items.iter().any(|r| r.key == item) {
            return None;
        }
        let generation = self.next_generation();
        self.items.push(Registration { key: item, generation });
        Some(generation)
    }

    /// Remove the registration of `item` made at `generation`. Returns whether something was
    /// removed.
    pub fn remove_item(&mut self, item: &ItemIdentity, generation: Generation) -> bool {
        remove(&mut self.items, item, generation)
    }

    /// Add a host. Returns `None` if the host is already registered, otherwise the generation and
    /// whether this is now the only host.
    pub fn add_host(&mut self, host: HostIdentity) -> Option<(Generation, bool)> {
        if self.hosts.iter().any(|r| r.key == host) {
            return None;
        }
        let generation = self.next_generation();
        self.hosts.push(Registration { key: host, generation });
        Some((generation, self.hosts.len() == 1))
    }

    /// Remove the registration of `host` made at `generation`. Returns `None` if nothing was
    /// removed, otherwise whether no hosts are left.
    pub fn remove_host(&mut self, host: &HostIdentity, generation: Generation) -> Option<bool> {
        remove(&mut self.hosts, host, generation).then(|| self.hosts.is_empty())
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemIdentity> {
        self.items.iter().map(|r| &r.key)
    }

    /// The item identities in their string form, as exposed over the bus.
    pub fn item_names(&self) -> Vec<String> {
        self.items().map(ToString::to_string).collect()
    }

    pub fn has_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.hosts.clear();
    }
}

fn remove<T: PartialEq>(registrations: &mut Vec<Registration<T>>, key: &T, generation: Generation) -> bool {
    match registrations.iter().position(|r| &r.key == key && r.generation == generation) {
        Some(idx) => {
            registrations.remove(idx);
            true
        }
        None => false,
    }
}
