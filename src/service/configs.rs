use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use super::ServiceError;
use crate::{
    allocator::PeerId,
    database::{write_atomic, Database},
    keys::KeyProvider,
    state::{Peer, State, StateError},
    wireguard,
};

/// A loaded interface. Every mutation is applied in memory, persisted, and
/// only then rendered into the server config.
#[derive(Debug)]
pub struct Interface<K> {
    database: Database,
    config_path: PathBuf,
    keys: K,
    state: State,
}

impl<K: KeyProvider> Interface<K> {
    pub(crate) fn new(database: Database, config_path: PathBuf, keys: K, state: State) -> Self {
        Self {
            database,
            config_path,
            keys,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.state.server().interface
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn can_add_peer(&self, name: &str) -> Result<PeerId, ServiceError> {
        Ok(self.state.can_add_peer(name)?)
    }

    #[instrument(skip(self), fields(interface = %self.name()))]
    pub fn add_peer(&mut self, name: &str) -> Result<PeerId, ServiceError> {
        let snapshot = self.state.clone();
        let id = self.state.add_peer(name, &self.keys)?.id();
        self.commit(snapshot)?;

        info!("peer {name} added with id {id}");
        Ok(id)
    }

    #[instrument(skip(self), fields(interface = %self.name()))]
    pub fn delete_peer(&mut self, id: PeerId) -> Result<Peer, ServiceError> {
        let snapshot = self.state.clone();
        let peer = self.state.delete_peer(id)?;
        self.commit(snapshot)?;

        info!("peer {} with id {id} deleted", peer.name());
        Ok(peer)
    }

    fn commit(&mut self, snapshot: State) -> Result<(), ServiceError> {
        if let Err(e) = self.database.save(&self.state) {
            warn!("save failed, rolling back: {e}");
            self.state = snapshot;
            return Err(e.into());
        }
        self.write_server_config()
    }

    pub fn server_config(&self) -> Result<String, ServiceError> {
        Ok(wireguard::server_config(&self.state, self.database.dir())?)
    }

    pub fn client_config(&self, id: PeerId) -> Result<String, ServiceError> {
        let peer = self.state.peer(id).ok_or(StateError::NotFound(id))?;
        Ok(wireguard::client_config(self.state.server(), peer)?)
    }

    #[instrument(skip(self), fields(interface = %self.name()))]
    pub fn write_server_config(&self) -> Result<(), ServiceError> {
        let text = self.server_config()?;
        write_atomic(&self.config_path, text.as_bytes()).map_err(|source| ServiceError::Io {
            path: self.config_path.clone(),
            source,
        })
    }

    #[instrument(skip(self), fields(interface = %self.name()))]
    pub fn export_client_config(&self, id: PeerId, path: &Path) -> Result<(), ServiceError> {
        let text = self.client_config(id)?;
        write_atomic(path, text.as_bytes()).map_err(|source| ServiceError::Io {
            path: path.to_owned(),
            source,
        })
    }
}
