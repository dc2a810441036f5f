//! Sans-I/O core of a QUIC version 1 transport: the packet wire format,
//! packet-number recovery, connection-ID issuance and acceptance, and
//! path MTU discovery.
//!
//! The crate performs no I/O and no cryptography. Packet types are views
//! into caller-provided buffers; the creation pipeline assembles outgoing
//! packets in place and hands the encryptor a [`creation::CryptoPacket`]
//! descriptor with the tag slot zeroed. ACK and loss outcomes flow in
//! from an external observer through the shared cells in [`ack`].

pub mod ack;
pub mod acceptor;
pub mod cid;
pub mod codec;
pub mod common;
pub mod config;
pub mod creation;
pub mod frame;
pub mod issuer;
pub mod mtu;
pub mod packet;
pub mod packet_num;

pub use common::Error;
