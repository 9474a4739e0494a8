#![allow(dead_code)]

use std::{cell::Cell, rc::Rc};

use wgdir::{
    keys::{KeyError, KeyProvider, Keypair},
    service::LinkOracle,
    Server, State,
};

/// Hands out `priv-N`/`pub-N` so rendered output is predictable.
#[derive(Clone, Default)]
pub struct CountingKeys(Rc<Cell<u32>>);

impl KeyProvider for CountingKeys {
    fn keypair(&self) -> Result<Keypair, KeyError> {
        let n = self.0.get() + 1;
        self.0.set(n);
        Ok(Keypair {
            private_key: format!("priv-{n}"),
            public_key: format!("pub-{n}"),
        })
    }

    fn preshared_key(&self) -> Result<String, KeyError> {
        Ok("psk".to_owned())
    }
}

pub struct Links(pub Vec<&'static str>);

impl LinkOracle for Links {
    fn interface_in_use(&self, name: &str) -> bool {
        self.0.contains(&name)
    }
}

pub fn server(address4: Option<&str>, address6: Option<&str>) -> Server {
    Server {
        interface: "wg0".to_owned(),
        address4: address4.map(|a| a.parse().unwrap()),
        address6: address6.map(|a| a.parse().unwrap()),
        listen_port: 51820,
        private_key: "server-priv".to_owned(),
        public_key: "server-pub".to_owned(),
        preshared_key: String::new(),
        post_up4: "A".to_owned(),
        post_down4: String::new(),
        post_up6: "B".to_owned(),
        post_down6: String::new(),
        client_dns: String::new(),
        client_route: "0.0.0.0/0".to_owned(),
        client_server_endpoint: "vpn.example.com".to_owned(),
        client_persistent_keepalive: 0,
    }
}

pub fn state(address4: Option<&str>, address6: Option<&str>) -> State {
    State::new(server(address4, address6)).unwrap()
}
