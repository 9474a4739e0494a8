use netlink_packet_core::{NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_REQUEST};
use netlink_packet_route::{link::nlas::Nla, LinkMessage, RtnlMessage};
use tracing::{instrument, warn};

use super::{Netlink, NetlinkError};
use crate::service::LinkOracle;

fn get_link(name: &str) -> NetlinkMessage<RtnlMessage> {
    let mut link = LinkMessage::default();
    link.nlas.push(Nla::IfName(name.to_owned()));

    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST;
    NetlinkMessage::new(header, NetlinkPayload::from(RtnlMessage::GetLink(link)))
}

impl Netlink {
    /// Asks the kernel for a link by name.
    pub fn link_exists(&self, name: &str) -> Result<bool, NetlinkError> {
        match self.request(get_link(name)) {
            Ok(RtnlMessage::NewLink(_)) => Ok(true),
            Ok(_) => Err(NetlinkError::UnexpectedResponse),
            Err(NetlinkError::NoDevice) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl LinkOracle for Netlink {
    #[instrument(skip(self))]
    fn interface_in_use(&self, name: &str) -> bool {
        match self.link_exists(name) {
            Ok(exists) => exists,
            Err(e) => {
                warn!("link lookup for {name} failed with error: {e}");
                false
            }
        }
    }
}
