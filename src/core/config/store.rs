use crate::core::config::data::ServerConfig;
use crate::core::error::ConfigError;

/// CRUD surface over named server records.
///
/// Implementations do not enforce name uniqueness themselves; callers run
/// [`plan_upsert`] first so a rename cannot silently clobber another server.
pub trait ConfigStore {
    fn list(&self) -> Vec<ServerConfig>;
    fn get(&self, name: &str) -> Option<ServerConfig>;
    fn upsert(&mut self, config: ServerConfig);
    fn remove(&mut self, name: &str) -> bool;
}

/// In-memory store backing the CLI manifest and the test suites. Keeps
/// manifest order for stable listings.
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    servers: Vec<ServerConfig>,
}

impl MemoryConfigStore {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }

    pub fn into_servers(self) -> Vec<ServerConfig> {
        self.servers
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.servers
            .iter()
            .position(|server| server.name.eq_ignore_ascii_case(name))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn list(&self) -> Vec<ServerConfig> {
        self.servers.clone()
    }

    fn get(&self, name: &str) -> Option<ServerConfig> {
        self.position(name).map(|index| self.servers[index].clone())
    }

    fn upsert(&mut self, config: ServerConfig) {
        match self.position(&config.name) {
            Some(index) => self.servers[index] = config,
            None => self.servers.push(config),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.servers.remove(index);
                true
            }
            None => false,
        }
    }
}

/// How an upsert will land in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertPlan {
    Create,
    Update,
    Rename { from: String },
}

/// Classifies an upsert as create/update/rename and rejects a rename that
/// collides with a different existing server.
pub fn plan_upsert(
    store: &dyn ConfigStore,
    previous_name: Option<&str>,
    config: &ServerConfig,
) -> Result<UpsertPlan, ConfigError> {
    match previous_name {
        Some(previous) if !previous.eq_ignore_ascii_case(&config.name) => {
            if store.get(&config.name).is_some() {
                Err(ConfigError::DuplicateName(config.name.clone()))
            } else {
                Ok(UpsertPlan::Rename {
                    from: previous.to_string(),
                })
            }
        }
        _ => {
            if store.get(&config.name).is_some() {
                Ok(UpsertPlan::Update)
            } else {
                Ok(UpsertPlan::Create)
            }
        }
    }
}
