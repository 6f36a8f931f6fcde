//! Raw rtnetlink plumbing for the bridge driver.
//!
//! Talks NETLINK_ROUTE directly over an `AF_NETLINK` socket: build the
//! message, send, wait for the kernel ack. Only the operations the runtime
//! needs are implemented: bridge and veth creation, link state and master
//! changes, address assignment, the default route and moving a link into
//! another network namespace.

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use ipnetwork::Ipv4Network;

const NETLINK_ROUTE: i32 = 0;

// Message types.
const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_NEWROUTE: u16 = 24;

// Header flags.
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_EXCL: u16 = 0x0200;
const NLM_F_CREATE: u16 = 0x0400;

const NLA_F_NESTED: u16 = 1 << 15;

const IFF_UP: u32 = 0x1;

// Link attributes.
const IFLA_ADDRESS: u16 = 1;
const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_NET_NS_FD: u16 = 28;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const VETH_INFO_PEER: u16 = 1;

// Address attributes.
const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;

// Route attributes and constants.
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RT_TABLE_MAIN: u8 = 254;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum NetlinkError {
    #[error("failed to create netlink socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to send netlink message: {0}")]
    Send(#[source] io::Error),
    #[error("failed to receive netlink response: {0}")]
    Recv(#[source] io::Error),
    #[error("netlink request refused: {0}")]
    Refused(#[source] io::Error),
    #[error("no interface named {0}")]
    LinkNotFound(String),
    #[error("interface name {0:?} is not a valid C string")]
    BadName(String),
}

/// Netlink message header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct NlMsgHdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
    nlmsg_flags: u16,
    nlmsg_seq: u32,
    nlmsg_pid: u32,
}

/// Interface info message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct IfInfoMsg {
    ifi_family: u8,
    _pad: u8,
    ifi_type: u16,
    ifi_index: i32,
    ifi_flags: u32,
    ifi_change: u32,
}

/// Interface address message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct IfAddrMsg {
    ifa_family: u8,
    ifa_prefixlen: u8,
    ifa_flags: u8,
    ifa_scope: u8,
    ifa_index: u32,
}

/// Route message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RtMsg {
    rtm_family: u8,
    rtm_dst_len: u8,
    rtm_src_len: u8,
    rtm_tos: u8,
    rtm_table: u8,
    rtm_protocol: u8,
    rtm_scope: u8,
    rtm_type: u8,
    rtm_flags: u32,
}

/// Netlink attribute header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct NlAttr {
    nla_len: u16,
    nla_type: u16,
}

fn push_struct<T: Copy>(msg: &mut Vec<u8>, value: &T) {
    msg.extend_from_slice(unsafe {
        std::slice::from_raw_parts((value as *const T).cast::<u8>(), mem::size_of::<T>())
    });
}

fn pad_to_align(msg: &mut Vec<u8>) {
    while msg.len() % 4 != 0 {
        msg.push(0);
    }
}

fn put_attr_bytes(msg: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    let attr = NlAttr {
        nla_len: (mem::size_of::<NlAttr>() + value.len()) as u16,
        nla_type: attr_type,
    };
    push_struct(msg, &attr);
    msg.extend_from_slice(value);
    pad_to_align(msg);
}

fn put_attr_str(msg: &mut Vec<u8>, attr_type: u16, value: &str) {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    put_attr_bytes(msg, attr_type, &bytes);
}

fn put_attr_u32(msg: &mut Vec<u8>, attr_type: u16, value: u32) {
    put_attr_bytes(msg, attr_type, &value.to_ne_bytes());
}

/// Opens a container attribute and returns its offset; the length is
/// patched in by [`end_attr`] once the nested payload is complete.
fn begin_attr(msg: &mut Vec<u8>, attr_type: u16) -> usize {
    let start = msg.len();
    push_struct(
        msg,
        &NlAttr {
            nla_len: 0,
            nla_type: attr_type,
        },
    );
    start
}

fn end_attr(msg: &mut Vec<u8>, start: usize) {
    let len = (msg.len() - start) as u16;
    msg[start..start + 2].copy_from_slice(&len.to_ne_bytes());
}

/// Handle on an rtnetlink socket in the current network namespace. Opening
/// a new handle after `setns` yields a socket inside the entered namespace.
pub struct NetlinkHandle {
    fd: OwnedFd,
    seq: u32,
}

impl NetlinkHandle {
    pub fn new() -> Result<Self, NetlinkError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_ROUTE,
            )
        };
        if fd < 0 {
            return Err(NetlinkError::Socket(io::Error::last_os_error()));
        }

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        addr.nl_pid = 0;
        addr.nl_groups = 0;
        let ret = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as u32,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(NetlinkError::Socket(err));
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            seq: 0,
        })
    }

    /// Resolves an interface name to its index in the current namespace.
    pub fn ifindex(&self, name: &str) -> Result<u32, NetlinkError> {
        let c_name = CString::new(name).map_err(|_| NetlinkError::BadName(name.to_string()))?;
        let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if index == 0 {
            return Err(NetlinkError::LinkNotFound(name.to_string()));
        }

        Ok(index)
    }

    pub fn link_exists(&self, name: &str) -> bool {
        self.ifindex(name).is_ok()
    }

    /// `ip link add <name> type bridge`
    pub fn create_bridge(&mut self, name: &str) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(&mut msg, &IfInfoMsg::default());
        put_attr_str(&mut msg, IFLA_IFNAME, name);
        let linkinfo = begin_attr(&mut msg, IFLA_LINKINFO | NLA_F_NESTED);
        put_attr_str(&mut msg, IFLA_INFO_KIND, "bridge");
        end_attr(&mut msg, linkinfo);

        self.finish(
            &mut msg,
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        self.send_and_ack(&msg)
    }

    /// `ip link add <name> master <bridge> type veth peer name <peer>`
    ///
    /// The peer description is an ifinfomsg of its own nested inside
    /// `VETH_INFO_PEER`, followed by the peer's attributes.
    pub fn create_veth(
        &mut self,
        name: &str,
        peer: &str,
        master_index: u32,
    ) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(&mut msg, &IfInfoMsg::default());
        put_attr_str(&mut msg, IFLA_IFNAME, name);
        put_attr_u32(&mut msg, IFLA_MASTER, master_index);

        let linkinfo = begin_attr(&mut msg, IFLA_LINKINFO | NLA_F_NESTED);
        put_attr_str(&mut msg, IFLA_INFO_KIND, "veth");
        let infodata = begin_attr(&mut msg, IFLA_INFO_DATA | NLA_F_NESTED);
        let peer_info = begin_attr(&mut msg, VETH_INFO_PEER);
        push_struct(&mut msg, &IfInfoMsg::default());
        put_attr_str(&mut msg, IFLA_IFNAME, peer);
        end_attr(&mut msg, peer_info);
        end_attr(&mut msg, infodata);
        end_attr(&mut msg, linkinfo);

        self.finish(
            &mut msg,
            RTM_NEWLINK,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        self.send_and_ack(&msg)
    }

    /// `ip link del` by index; a veth peer goes down with its partner.
    pub fn delete_link(&mut self, index: u32) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &IfInfoMsg {
                ifi_index: index as i32,
                ..Default::default()
            },
        );

        self.finish(&mut msg, RTM_DELLINK, NLM_F_REQUEST | NLM_F_ACK);
        self.send_and_ack(&msg)
    }

    /// `ip link set <index> up`
    pub fn set_link_up(&mut self, index: u32) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &IfInfoMsg {
                ifi_index: index as i32,
                ifi_flags: IFF_UP,
                ifi_change: IFF_UP,
                ..Default::default()
            },
        );

        self.finish(&mut msg, RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK);
        self.send_and_ack(&msg)
    }

    /// `ip link set <index> netns <fd>`: moves the link into the network
    /// namespace behind the file descriptor.
    pub fn set_link_netns(&mut self, index: u32, netns_fd: RawFd) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &IfInfoMsg {
                ifi_index: index as i32,
                ..Default::default()
            },
        );
        put_attr_u32(&mut msg, IFLA_NET_NS_FD, netns_fd as u32);

        self.finish(&mut msg, RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK);
        self.send_and_ack(&msg)
    }

    /// `ip link set <index> address <mac>`
    pub fn set_link_addr(&mut self, index: u32, mac: &[u8; 6]) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &IfInfoMsg {
                ifi_index: index as i32,
                ..Default::default()
            },
        );
        put_attr_bytes(&mut msg, IFLA_ADDRESS, mac);

        self.finish(&mut msg, RTM_NEWLINK, NLM_F_REQUEST | NLM_F_ACK);
        self.send_and_ack(&msg)
    }

    /// `ip addr add <addr> dev <index>`
    pub fn add_address(&mut self, index: u32, addr: Ipv4Network) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &IfAddrMsg {
                ifa_family: libc::AF_INET as u8,
                ifa_prefixlen: addr.prefix(),
                ifa_index: index,
                ..Default::default()
            },
        );
        let octets = addr.ip().octets();
        put_attr_bytes(&mut msg, IFA_LOCAL, &octets);
        put_attr_bytes(&mut msg, IFA_ADDRESS, &octets);

        self.finish(
            &mut msg,
            RTM_NEWADDR,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        self.send_and_ack(&msg)
    }

    /// `ip route add default via <gateway> dev <index>`
    pub fn add_default_route(
        &mut self,
        gateway: Ipv4Addr,
        index: u32,
    ) -> Result<(), NetlinkError> {
        let mut msg = self.new_message();
        push_struct(
            &mut msg,
            &RtMsg {
                rtm_family: libc::AF_INET as u8,
                rtm_dst_len: 0,
                rtm_table: RT_TABLE_MAIN,
                rtm_protocol: RTPROT_BOOT,
                rtm_scope: RT_SCOPE_UNIVERSE,
                rtm_type: RTN_UNICAST,
                ..Default::default()
            },
        );
        put_attr_bytes(&mut msg, RTA_GATEWAY, &gateway.octets());
        put_attr_u32(&mut msg, RTA_OIF, index);

        self.finish(
            &mut msg,
            RTM_NEWROUTE,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        );
        self.send_and_ack(&msg)
    }

    /// Starts a message with space reserved for the header.
    fn new_message(&self) -> Vec<u8> {
        vec![0u8; mem::size_of::<NlMsgHdr>()]
    }

    /// Patches the header in once the payload is complete.
    fn finish(&mut self, msg: &mut Vec<u8>, msg_type: u16, flags: u16) {
        self.seq = self.seq.wrapping_add(1);
        let hdr = NlMsgHdr {
            nlmsg_len: msg.len() as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: self.seq,
            nlmsg_pid: 0,
        };
        let hdr_bytes = unsafe {
            std::slice::from_raw_parts(
                std::ptr::addr_of!(hdr).cast::<u8>(),
                mem::size_of::<NlMsgHdr>(),
            )
        };
        msg[..mem::size_of::<NlMsgHdr>()].copy_from_slice(hdr_bytes);
    }

    fn send_and_ack(&mut self, msg: &[u8]) -> Result<(), NetlinkError> {
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr().cast::<libc::c_void>(),
                msg.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(NetlinkError::Send(io::Error::last_os_error()));
        }

        let mut buf = [0u8; 4096];
        let len = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        };
        if len < 0 {
            return Err(NetlinkError::Recv(io::Error::last_os_error()));
        }

        // With NLM_F_ACK set the kernel answers with NLMSG_ERROR; a zero
        // error code is the ack, anything else the errno of the request.
        if len as usize >= mem::size_of::<NlMsgHdr>() + 4 {
            let hdr = unsafe { &*buf.as_ptr().cast::<NlMsgHdr>() };
            if hdr.nlmsg_type == libc::NLMSG_ERROR as u16 {
                let code = unsafe {
                    *buf.as_ptr().add(mem::size_of::<NlMsgHdr>()).cast::<i32>()
                };
                if code != 0 {
                    return Err(NetlinkError::Refused(io::Error::from_raw_os_error(-code)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_attrs_are_padded() {
        let mut msg = Vec::new();
        put_attr_str(&mut msg, IFLA_IFNAME, "veth0");

        // 4 byte header + "veth0\0" = 10, padded to 12.
        assert_eq!(msg.len(), 12);
        assert_eq!(u16::from_ne_bytes([msg[0], msg[1]]), 10);
        assert_eq!(u16::from_ne_bytes([msg[2], msg[3]]), IFLA_IFNAME);
        assert_eq!(&msg[4..10], b"veth0\0");
        assert_eq!(&msg[10..12], &[0, 0]);
    }

    #[test]
    fn test_u32_attr_layout() {
        let mut msg = Vec::new();
        put_attr_u32(&mut msg, IFLA_MASTER, 7);

        assert_eq!(msg.len(), 8);
        assert_eq!(u16::from_ne_bytes([msg[0], msg[1]]), 8);
        assert_eq!(
            u32::from_ne_bytes([msg[4], msg[5], msg[6], msg[7]]),
            7
        );
    }

    #[test]
    fn test_nested_attr_length_is_patched() {
        let mut msg = Vec::new();
        let outer = begin_attr(&mut msg, IFLA_LINKINFO | NLA_F_NESTED);
        put_attr_str(&mut msg, IFLA_INFO_KIND, "veth");
        end_attr(&mut msg, outer);

        // outer header (4) + inner attr (4 + "veth\0" padded to 8) = 16
        assert_eq!(msg.len(), 16);
        assert_eq!(u16::from_ne_bytes([msg[0], msg[1]]), 16);
        assert_eq!(
            u16::from_ne_bytes([msg[2], msg[3]]),
            IFLA_LINKINFO | NLA_F_NESTED
        );
    }

    #[test]
    fn test_messages_are_aligned() {
        let mut msg = vec![0u8; mem::size_of::<NlMsgHdr>()];
        push_struct(&mut msg, &IfInfoMsg::default());
        put_attr_str(&mut msg, IFLA_IFNAME, "br0");
        put_attr_u32(&mut msg, IFLA_MASTER, 3);

        assert_eq!(msg.len() % 4, 0);
    }
}
