//! Open state through the engine: share reservations across clients,
//! stateid monotonicity, downgrade rules and read/write round trips.

mod support;

use std::sync::Arc;

use nfs_sable::state::{StateConfig, StateManager};
use nfs_sable::xdr::nfs4::dir::LOOKUP4args;
use nfs_sable::xdr::nfs4::file::{
    openflag4, open_claim4, open_owner4, OPEN4args, OPEN4_SHARE_ACCESS_READ,
    OPEN4_SHARE_ACCESS_WRITE, OPEN4_SHARE_DENY_NONE, OPEN4_SHARE_DENY_READ, READ4args,
    WRITE4args, stable_how4, CLOSE4args,
};
use nfs_sable::xdr::nfs4::session::{
    channel_attrs4, client_owner4, state_protect4_a, CREATE_SESSION4args, EXCHANGE_ID4args,
    SEQUENCE4args,
};
use nfs_sable::xdr::nfs4::{
    change_info4, nfs_opnum4, nfsstat4, sessionid4, stateid4, verifier4,
};

use support::{context_with_state, encode, op, parse_reply, run_compound, MemFs};

fn exchange_id_op(owner: &[u8]) -> Vec<u8> {
    op(
        nfs_opnum4::OP_EXCHANGE_ID,
        &encode(&EXCHANGE_ID4args {
            eia_clientowner: client_owner4 { co_verifier: [1; 8], co_ownerid: owner.to_vec() },
            eia_flags: 0,
            eia_state_protect: state_protect4_a::None,
            eia_client_impl_id: Vec::new(),
        }),
    )
}

fn create_session_op(clientid: u64, sequence: u32) -> Vec<u8> {
    let attrs = channel_attrs4 {
        ca_maxrequestsize: 1 << 20,
        ca_maxresponsesize: 1 << 20,
        ca_maxrequests: 8,
        ca_maxoperations: 16,
        ..Default::default()
    };
    op(
        nfs_opnum4::OP_CREATE_SESSION,
        &encode(&CREATE_SESSION4args {
            csa_clientid: clientid,
            csa_sequence: sequence,
            csa_flags: 0,
            csa_fore_chan_attrs: attrs.clone(),
            csa_back_chan_attrs: attrs,
            csa_cb_program: 0,
            csa_sec_parms: Vec::new(),
        }),
    )
}

fn sequence_op(sessionid: sessionid4, seqid: u32) -> Vec<u8> {
    op(
        nfs_opnum4::OP_SEQUENCE,
        &encode(&SEQUENCE4args {
            sa_sessionid: sessionid,
            sa_sequenceid: seqid,
            sa_slotid: 0,
            sa_highest_slotid: 7,
            sa_cachethis: false,
        }),
    )
}

fn open_op(owner: &[u8], name: &[u8], access: u32, deny: u32) -> Vec<u8> {
    op(
        nfs_opnum4::OP_OPEN,
        &encode(&OPEN4args {
            seqid: 0,
            share_access: access,
            share_deny: deny,
            owner: open_owner4 { clientid: 0, owner: owner.to_vec() },
            openhow: openflag4::NoCreate,
            claim: open_claim4::NullNamed(name.into()),
        }),
    )
}

struct Client {
    context: nfs_sable::protocol::rpc::Context,
    sessionid: sessionid4,
    next_seq: u32,
}

impl Client {
    async fn establish(fs: Arc<MemFs>, state: Arc<StateManager>, owner: &[u8], conn: u64) -> Client {
        let context = context_with_state(fs, state, conn);
        let reply = run_compound(&context, "eid", 1, &[exchange_id_op(owner)]).await;
        let mut parsed = parse_reply(&reply);
        assert_eq!(parsed.status, nfsstat4::NFS4_OK);
        parsed.next_result();
        let clientid: u64 = parsed.read();
        let sequenceid: u32 = parsed.read();
        let reply =
            run_compound(&context, "cs", 1, &[create_session_op(clientid, sequenceid)]).await;
        let mut parsed = parse_reply(&reply);
        assert_eq!(parsed.status, nfsstat4::NFS4_OK);
        parsed.next_result();
        let sessionid: sessionid4 = parsed.read();
        Client { context, sessionid, next_seq: 1 }
    }

    /// Runs SEQUENCE + PUTROOTFH + LOOKUP(export) + the given ops.
    async fn run_in_export(&mut self, ops: &[Vec<u8>]) -> Vec<u8> {
        let mut all = vec![
            sequence_op(self.sessionid, self.next_seq),
            op(nfs_opnum4::OP_PUTROOTFH, &[]),
            op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "export".into() })),
        ];
        self.next_seq += 1;
        all.extend_from_slice(ops);
        run_compound(&self.context, "t", 1, &all).await
    }
}

/// Skips `count` results, consuming the SEQUENCE4resok body that follows a
/// successful leading SEQUENCE result's opcode/status pair.
fn skip_results(parsed: &mut support::Reply, count: usize) {
    for i in 0..count {
        let (opcode, status) = parsed.next_result();
        if i == 0 && opcode == nfs_opnum4::OP_SEQUENCE && status == nfsstat4::NFS4_OK {
            let _sessionid: sessionid4 = parsed.read();
            let _sequenceid: u32 = parsed.read();
            let _slotid: u32 = parsed.read();
            let _highest_slotid: u32 = parsed.read();
            let _target_highest_slotid: u32 = parsed.read();
            let _status_flags: u32 = parsed.read();
        }
    }
}

/// Parses an OPEN result body after the (opcode, status) pair: returns the
/// granted stateid.
fn parse_open_result(parsed: &mut support::Reply) -> stateid4 {
    let stateid: stateid4 = parsed.read();
    let _cinfo: change_info4 = parsed.read();
    let _rflags: u32 = parsed.read();
    let _attrset: nfs_sable::xdr::nfs4::bitmap4 = parsed.read();
    let _deleg_type: u32 = parsed.read();
    stateid
}

#[tokio::test]
async fn share_deny_blocks_conflicting_open_across_clients() {
    let fs = Arc::new(MemFs::new());
    fs.add_file(b"data.bin", b"payload");
    let state = Arc::new(StateManager::new(StateConfig::default()));

    let mut alice = Client::establish(Arc::clone(&fs), Arc::clone(&state), b"alice", 1).await;
    let mut bob = Client::establish(Arc::clone(&fs), Arc::clone(&state), b"bob", 2).await;

    // Alice opens with access WRITE, deny READ.
    let reply = alice
        .run_in_export(&[open_op(b"alice-owner", b"data.bin", OPEN4_SHARE_ACCESS_WRITE, OPEN4_SHARE_DENY_READ)])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);

    // Bob's read open trips Alice's deny.
    let reply = bob
        .run_in_export(&[open_op(b"bob-owner", b"data.bin", OPEN4_SHARE_ACCESS_READ, OPEN4_SHARE_DENY_NONE)])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4ERR_SHARE_DENIED);
    // SEQUENCE, PUTROOTFH, LOOKUP succeeded; OPEN is the fourth result.
    assert_eq!(parsed.numresults, 4);
    skip_results(&mut parsed, 3);
    assert_eq!(parsed.next_result(), (nfs_opnum4::OP_OPEN, nfsstat4::NFS4ERR_SHARE_DENIED));
}

#[tokio::test]
async fn open_write_read_close_round_trip() {
    let fs = Arc::new(MemFs::new());
    fs.add_file(b"notes.txt", b"before");
    let state = Arc::new(StateManager::new(StateConfig::default()));
    let mut client = Client::establish(Arc::clone(&fs), Arc::clone(&state), b"writer", 1).await;

    // Open for read+write.
    let reply = client
        .run_in_export(&[open_op(
            b"writer-owner",
            b"notes.txt",
            OPEN4_SHARE_ACCESS_READ | OPEN4_SHARE_ACCESS_WRITE,
            OPEN4_SHARE_DENY_NONE,
        )])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 3);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let stateid = parse_open_result(&mut parsed);
    assert_eq!(stateid.seqid, 1);

    // Write through the granted stateid; the reply carries the boot
    // verifier and UNSTABLE4.
    let write_args = encode(&WRITE4args {
        stateid,
        offset: 0,
        stable: stable_how4::FILE_SYNC4,
        data: b"after!".to_vec(),
    });
    let lookup_file =
        op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "notes.txt".into() }));
    let reply = client
        .run_in_export(&[lookup_file.clone(), op(nfs_opnum4::OP_WRITE, &write_args)])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 4);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let count: u32 = parsed.read();
    assert_eq!(count, 6);
    let committed: u32 = parsed.read();
    assert_eq!(committed, 0); // UNSTABLE4
    let verifier: verifier4 = parsed.read();
    assert_eq!(verifier, state.boot_verifier());

    // Read it back with the anonymous stateid.
    let read_args = encode(&READ4args { stateid: stateid4::anonymous(), offset: 0, count: 100 });
    let reply = client
        .run_in_export(&[lookup_file.clone(), op(nfs_opnum4::OP_READ, &read_args)])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 4);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let eof: bool = parsed.read();
    let data: Vec<u8> = parsed.read();
    assert!(eof);
    assert_eq!(data, b"after!");

    // Close releases the open; a second close of the same stateid fails.
    let close_args = encode(&CLOSE4args { seqid: 0, open_stateid: stateid });
    let reply = client
        .run_in_export(&[lookup_file.clone(), op(nfs_opnum4::OP_CLOSE, &close_args)])
        .await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4_OK);
    let reply = client
        .run_in_export(&[lookup_file, op(nfs_opnum4::OP_CLOSE, &close_args)])
        .await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_BAD_STATEID);
}

#[tokio::test]
async fn write_with_read_only_stateid_is_an_openmode_error() {
    let fs = Arc::new(MemFs::new());
    fs.add_file(b"ro.txt", b"read only");
    let state = Arc::new(StateManager::new(StateConfig::default()));
    let mut client = Client::establish(Arc::clone(&fs), Arc::clone(&state), b"reader", 1).await;

    let reply = client
        .run_in_export(&[open_op(b"ro-owner", b"ro.txt", OPEN4_SHARE_ACCESS_READ, OPEN4_SHARE_DENY_NONE)])
        .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 3);
    parsed.next_result();
    let stateid = parse_open_result(&mut parsed);

    let write_args = encode(&WRITE4args {
        stateid,
        offset: 0,
        stable: stable_how4::UNSTABLE4,
        data: b"nope".to_vec(),
    });
    let lookup_file = op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "ro.txt".into() }));
    let reply =
        client.run_in_export(&[lookup_file, op(nfs_opnum4::OP_WRITE, &write_args)]).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_OPENMODE);
}

#[tokio::test]
async fn open_of_missing_file_without_create() {
    let fs = Arc::new(MemFs::new());
    let state = Arc::new(StateManager::new(StateConfig::default()));
    let mut client = Client::establish(Arc::clone(&fs), Arc::clone(&state), b"c", 1).await;
    let reply = client
        .run_in_export(&[open_op(b"o", b"absent", OPEN4_SHARE_ACCESS_READ, OPEN4_SHARE_DENY_NONE)])
        .await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_NOENT);
}
