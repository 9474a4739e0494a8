pub mod error;
pub mod links;

use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RtnlMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};

use error::NetlinkError;

pub struct Netlink {
    route: Socket,
}

impl Netlink {
    pub fn new() -> Result<Self, NetlinkError> {
        let socket = Socket::new(NETLINK_ROUTE)?;
        socket.connect(&SocketAddr::new(0, 0))?;

        Ok(Self { route: socket })
    }

    /// Sends one rtnetlink request and decodes the single reply.
    fn request(&self, mut msg: NetlinkMessage<RtnlMessage>) -> Result<RtnlMessage, NetlinkError> {
        msg.finalize();
        let mut buf = vec![0; msg.buffer_len()];
        msg.serialize(&mut buf[..]);
        self.route.send(&buf, 0)?;

        let mut reply = Vec::with_capacity(8192);
        let size = self.route.recv(&mut reply, 0)?;
        match <NetlinkMessage<RtnlMessage>>::deserialize(&reply[..size])?.payload {
            NetlinkPayload::InnerMessage(msg) => Ok(msg),
            NetlinkPayload::Error(e) => Err(NetlinkError::from(e.code)),
            _ => Err(NetlinkError::UnexpectedResponse),
        }
    }
}
