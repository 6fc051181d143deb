//! PORTMAP service (program 100000, version 2) as specified in RFC 1833
//! (previously RFC 1057 Appendix A): an in-memory table mapping RPC
//! program numbers to ports, pre-seeded with the services this server
//! fronts.

use std::io::{Read, Write};

use num_traits::cast::FromPrimitive;
use tracing::{debug, error};

use crate::protocol::rpc;
use crate::protocol::xdr::{self, deserialize, nsm, portmap, Serialize};

/// The program-to-port registry.
#[derive(Debug, Default)]
pub struct PortmapTable {
    mappings: Vec<portmap::mapping>,
}

impl PortmapTable {
    /// Seeds the table with the programs reachable through this listener:
    /// NFSv4, NSM and NLM, all on the server's TCP port.
    pub fn seeded(port: u32) -> PortmapTable {
        let mut table = PortmapTable::default();
        for (prog, vers) in [
            (xdr::nfs4::PROGRAM, xdr::nfs4::VERSION),
            (nsm::PROGRAM, nsm::VERSION),
            (100021, 4), // NLM, advertised only
        ] {
            table.set(portmap::mapping { prog, vers, prot: portmap::IPPROTO_TCP, port });
        }
        table
    }

    /// Registers a mapping, replacing any previous entry for the same
    /// (program, version, protocol) triple. Returns true when the entry
    /// changed the table.
    pub fn set(&mut self, new: portmap::mapping) -> bool {
        if let Some(existing) = self
            .mappings
            .iter_mut()
            .find(|m| m.prog == new.prog && m.vers == new.vers && m.prot == new.prot)
        {
            let changed = existing.port != new.port;
            existing.port = new.port;
            return changed;
        }
        self.mappings.push(new);
        true
    }

    /// Removes all mappings for a (program, version) pair. Returns true
    /// when something was removed.
    pub fn unset(&mut self, prog: u32, vers: u32) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|m| !(m.prog == prog && m.vers == vers));
        before != self.mappings.len()
    }

    /// Looks up the port for a (program, version, protocol) triple; zero
    /// means unregistered.
    pub fn get_port(&self, prog: u32, vers: u32, prot: u32) -> u32 {
        self.mappings
            .iter()
            .find(|m| m.prog == prog && m.vers == vers && m.prot == prot)
            .map(|m| m.port)
            .unwrap_or(0)
    }

    pub fn mappings(&self) -> &[portmap::mapping] {
        &self.mappings
    }
}

/// Main handler for the PORTMAP program.
pub fn handle_portmap(
    xid: u32,
    call: &xdr::rpc::call_body,
    input: &mut (impl Read + Send),
    output: &mut impl Write,
    context: &rpc::Context,
) -> Result<(), anyhow::Error> {
    if call.vers != portmap::VERSION {
        error!("invalid portmap version {} != {}", call.vers, portmap::VERSION);
        xdr::rpc::prog_mismatch_reply_message(xid, portmap::VERSION).serialize(output)?;
        return Ok(());
    }
    let proc = portmap::PortmapProcedure::from_u32(call.proc)
        .unwrap_or(portmap::PortmapProcedure::INVALID);
    match proc {
        portmap::PortmapProcedure::PMAPPROC_NULL => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
        }
        portmap::PortmapProcedure::PMAPPROC_GETPORT => {
            let args = deserialize::<portmap::mapping, _>(input)?;
            let port = context
                .portmap_table
                .read()
                .unwrap()
                .get_port(args.prog, args.vers, args.prot);
            debug!("pmapproc_getport({}, {}, {}) -> {}", args.prog, args.vers, args.prot, port);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            port.serialize(output)?;
        }
        portmap::PortmapProcedure::PMAPPROC_SET => {
            let args = deserialize::<portmap::mapping, _>(input)?;
            let accepted = context.portmap_table.write().unwrap().set(args);
            debug!("pmapproc_set({:?}) -> {}", args, accepted);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            accepted.serialize(output)?;
        }
        portmap::PortmapProcedure::PMAPPROC_UNSET => {
            let args = deserialize::<portmap::mapping, _>(input)?;
            let removed = context.portmap_table.write().unwrap().unset(args.prog, args.vers);
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            removed.serialize(output)?;
        }
        portmap::PortmapProcedure::PMAPPROC_DUMP => {
            xdr::rpc::make_success_reply(xid).serialize(output)?;
            let table = context.portmap_table.read().unwrap();
            // The dump is a linked list: present flag before each entry.
            for mapping in table.mappings() {
                true.serialize(output)?;
                mapping.serialize(output)?;
            }
            false.serialize(output)?;
        }
        _ => {
            xdr::rpc::proc_unavail_reply_message(xid).serialize(output)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_table_answers_nfs() {
        let table = PortmapTable::seeded(2049);
        assert_eq!(table.get_port(100003, 4, portmap::IPPROTO_TCP), 2049);
        assert_eq!(table.get_port(100024, 1, portmap::IPPROTO_TCP), 2049);
        assert_eq!(table.get_port(100005, 3, portmap::IPPROTO_TCP), 0);
    }

    #[test]
    fn set_replaces_and_unset_removes() {
        let mut table = PortmapTable::default();
        let m = portmap::mapping { prog: 5, vers: 1, prot: portmap::IPPROTO_TCP, port: 100 };
        assert!(table.set(m));
        assert!(table.set(portmap::mapping { port: 200, ..m }));
        assert_eq!(table.get_port(5, 1, portmap::IPPROTO_TCP), 200);
        assert!(table.unset(5, 1));
        assert_eq!(table.get_port(5, 1, portmap::IPPROTO_TCP), 0);
        assert!(!table.unset(5, 1));
    }
}
