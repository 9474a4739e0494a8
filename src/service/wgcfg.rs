use std::{
    fs::DirBuilder,
    io::{self, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, instrument};

use super::{Interface, ServerSettings, Wgdir, DIR_PREFIX};
use crate::{
    database::{Database, DatabaseError},
    keys::{KeyError, KeyProvider},
    state::{Server, State, StateError},
    wireguard::RenderError,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("interface name should be in form wg<number>, got {0:?}")]
    InvalidInterfaceName(String),
    #[error("{0}. Try a different name.")]
    InterfaceExists(String),
    #[error("interface {0} is not configured")]
    InterfaceMissing(String),
    #[error("directory {dir} is not writable: {source}")]
    NotWritable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("config render failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Keys(#[from] KeyError),
}

/// Tells whether a network interface with this name already exists.
pub trait LinkOracle {
    fn interface_in_use(&self, name: &str) -> bool;
}

fn is_interface_name(name: &str) -> bool {
    name.strip_prefix("wg").map_or(false, |n| {
        (1..=4).contains(&n.len()) && n.bytes().all(|b| b.is_ascii_digit())
    })
}

fn check_writable(dir: &Path) -> Result<(), ServiceError> {
    let err = |source: io::Error| ServiceError::NotWritable {
        dir: dir.to_owned(),
        source,
    };

    let mut scratch = tempfile::Builder::new()
        .prefix(".wgdir-check")
        .tempfile_in(dir)
        .map_err(err)?;
    let token = format!("{:016x}", rand::random::<u64>());
    scratch.write_all(token.as_bytes()).map_err(err)?;
    scratch.flush().map_err(err)?;

    let read = std::fs::read_to_string(scratch.path()).map_err(err)?;
    if read != token {
        return Err(err(io::Error::new(
            io::ErrorKind::InvalidData,
            "what we read back is not what we wrote",
        )));
    }
    scratch.close().map_err(err)
}

impl<K: KeyProvider + Clone> Wgdir<K> {
    pub fn validate_interface_name(
        &self,
        name: &str,
        links: &impl LinkOracle,
    ) -> Result<(), ServiceError> {
        if !is_interface_name(name) {
            return Err(ServiceError::InvalidInterfaceName(name.to_owned()));
        }

        let conf = self.config_path(name);
        if conf.exists() {
            return Err(ServiceError::InterfaceExists(format!(
                "Found config for {name} at {}",
                conf.display()
            )));
        }

        let dir = self.interface_dir(name);
        if dir.exists() {
            return Err(ServiceError::InterfaceExists(format!(
                "Found directory {}",
                dir.display()
            )));
        }

        if links.interface_in_use(name) {
            return Err(ServiceError::InterfaceExists(format!(
                "Network interface {name} exists in routing tables"
            )));
        }

        Ok(())
    }

    /// Writes, reads back and removes a scratch file in both directories.
    #[instrument(skip(self))]
    pub fn test_directories(&self) -> Result<(), ServiceError> {
        check_writable(&self.database_dir)?;
        if self.wireguard_dir != self.database_dir {
            check_writable(&self.wireguard_dir)?;
        }
        Ok(())
    }

    /// Names of all interfaces with a state directory, sorted.
    pub fn interfaces(&self) -> Result<Vec<String>, ServiceError> {
        let entries = std::fs::read_dir(&self.database_dir).map_err(|source| ServiceError::Io {
            path: self.database_dir.clone(),
            source,
        })?;

        let mut names = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix(DIR_PREFIX))
                    .filter(|n| is_interface_name(n))
                    .map(str::to_owned)
            })
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    #[instrument(skip(self, settings, links))]
    pub fn create_interface(
        &self,
        name: &str,
        settings: &ServerSettings,
        links: &impl LinkOracle,
    ) -> Result<Interface<K>, ServiceError> {
        self.validate_interface_name(name, links)?;

        let pair = self.keys.keypair()?;
        let preshared_key = if settings.preshared_key {
            self.keys.preshared_key()?
        } else {
            String::new()
        };
        let (post_up4, post_down4) = settings.hooks(false);
        let (post_up6, post_down6) = settings.hooks(true);

        let state = State::new(Server {
            interface: name.to_owned(),
            address4: settings.address4,
            address6: settings.address6,
            listen_port: settings.port,
            private_key: pair.private_key,
            public_key: pair.public_key,
            preshared_key,
            post_up4,
            post_down4,
            post_up6,
            post_down6,
            client_dns: settings.dns.clone(),
            client_route: settings.route.clone(),
            client_server_endpoint: settings.endpoint.clone(),
            client_persistent_keepalive: settings.keepalive,
        })?;

        let dir = self.interface_dir(name);
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
        builder.create(&dir).map_err(|source| ServiceError::Io {
            path: dir.clone(),
            source,
        })?;

        let interface = self.interface(name, state);
        interface.database().save(interface.state())?;
        interface.write_server_config()?;

        info!("interface {name} created in {}", dir.display());
        Ok(interface)
    }

    #[instrument(skip(self))]
    pub fn open(&self, name: &str) -> Result<Interface<K>, ServiceError> {
        let database = Database::new(self.interface_dir(name));
        if !database.exists() {
            return Err(ServiceError::InterfaceMissing(name.to_owned()));
        }
        let state = database.load()?;
        Ok(self.interface(name, state))
    }
}
