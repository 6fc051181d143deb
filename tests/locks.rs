//! Byte-range locking through the engine: grant, conflict reporting with
//! the holder, unlock and re-test.

mod support;

use std::sync::Arc;

use nfs_sable::state::{StateConfig, StateManager};
use nfs_sable::xdr::nfs4::dir::LOOKUP4args;
use nfs_sable::xdr::nfs4::file::{
    openflag4, open_claim4, open_owner4, OPEN4args, OPEN4_SHARE_ACCESS_BOTH,
    OPEN4_SHARE_DENY_NONE,
};
use nfs_sable::xdr::nfs4::lock::{
    lock_owner4, locker4, nfs_lock_type4, open_to_lock_owner4, LOCK4args, LOCK4denied,
    LOCKT4args, LOCKU4args, NFS4_LENGTH_EOF,
};
use nfs_sable::xdr::nfs4::session::{
    channel_attrs4, client_owner4, state_protect4_a, CREATE_SESSION4args, EXCHANGE_ID4args,
    SEQUENCE4args,
};
use nfs_sable::xdr::nfs4::{change_info4, nfs_opnum4, nfsstat4, sessionid4, stateid4};

use support::{context_with_state, encode, op, parse_reply, run_compound, MemFs, Reply};

async fn establish(
    fs: Arc<MemFs>,
    state: Arc<StateManager>,
    owner: &[u8],
    conn: u64,
) -> (nfs_sable::protocol::rpc::Context, sessionid4) {
    let context = context_with_state(fs, state, conn);
    let reply = run_compound(
        &context,
        "eid",
        1,
        &[op(
            nfs_opnum4::OP_EXCHANGE_ID,
            &encode(&EXCHANGE_ID4args {
                eia_clientowner: client_owner4 {
                    co_verifier: [3; 8],
                    co_ownerid: owner.to_vec(),
                },
                eia_flags: 0,
                eia_state_protect: state_protect4_a::None,
                eia_client_impl_id: Vec::new(),
            }),
        )],
    )
    .await;
    let mut parsed = parse_reply(&reply);
    parsed.next_result();
    let clientid: u64 = parsed.read();
    let sequenceid: u32 = parsed.read();

    let attrs = channel_attrs4 {
        ca_maxrequestsize: 1 << 20,
        ca_maxresponsesize: 1 << 20,
        ca_maxrequests: 8,
        ca_maxoperations: 16,
        ..Default::default()
    };
    let reply = run_compound(
        &context,
        "cs",
        1,
        &[op(
            nfs_opnum4::OP_CREATE_SESSION,
            &encode(&CREATE_SESSION4args {
                csa_clientid: clientid,
                csa_sequence: sequenceid,
                csa_flags: 0,
                csa_fore_chan_attrs: attrs.clone(),
                csa_back_chan_attrs: attrs,
                csa_cb_program: 0,
                csa_sec_parms: Vec::new(),
            }),
        )],
    )
    .await;
    let mut parsed = parse_reply(&reply);
    parsed.next_result();
    let sessionid: sessionid4 = parsed.read();
    (context, sessionid)
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

fn navigate_to_file() -> Vec<Vec<u8>> {
    vec![
        op(nfs_opnum4::OP_PUTROOTFH, &[]),
        op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "export".into() })),
        op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "locked.bin".into() })),
    ]
}

fn skip_results(parsed: &mut Reply, count: usize) {
    for i in 0..count {
        let (opcode, status) = parsed.next_result();
        if i == 0 && opcode == nfs_opnum4::OP_SEQUENCE && status == nfsstat4::NFS4_OK {
            // A successful SEQUENCE carries a SEQUENCE4resok body beyond
            // the status; consume it so later opcodes parse on-boundary.
            let _sessionid: sessionid4 = parsed.read();
            let _sequenceid: u32 = parsed.read();
            let _slotid: u32 = parsed.read();
            let _highest_slotid: u32 = parsed.read();
            let _target_highest_slotid: u32 = parsed.read();
            let _status_flags: u32 = parsed.read();
        }
    }
}

fn parse_open_stateid(parsed: &mut Reply) -> stateid4 {
    let stateid: stateid4 = parsed.read();
    let _cinfo: change_info4 = parsed.read();
    let _rflags: u32 = parsed.read();
    let _attrset: nfs_sable::xdr::nfs4::bitmap4 = parsed.read();
    let _deleg: u32 = parsed.read();
    stateid
}

#[tokio::test]
async fn lock_denial_reports_holder_and_unlock_clears_it() {
    let fs = Arc::new(MemFs::new());
    fs.add_file(b"locked.bin", &[0u8; 1024]);
    let state = Arc::new(StateManager::new(StateConfig::default()));

    let (context, sessionid) = establish(Arc::clone(&fs), Arc::clone(&state), b"locker", 1).await;

    // Open and take a write lock on [100, 300).
    let open = op(
        nfs_opnum4::OP_OPEN,
        &encode(&OPEN4args {
            seqid: 0,
            share_access: OPEN4_SHARE_ACCESS_BOTH,
            share_deny: OPEN4_SHARE_DENY_NONE,
            owner: open_owner4 { clientid: 0, owner: b"open-owner".to_vec() },
            openhow: openflag4::NoCreate,
            claim: open_claim4::NullNamed("locked.bin".into()),
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 1), op(nfs_opnum4::OP_PUTROOTFH, &[])];
    ops.push(op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "export".into() })));
    ops.push(open);
    let reply = run_compound(&context, "open", 1, &ops).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 3);
    parsed.next_result();
    let open_stateid = parse_open_stateid(&mut parsed);

    let lock = op(
        nfs_opnum4::OP_LOCK,
        &encode(&LOCK4args {
            locktype: nfs_lock_type4::WRITE_LT,
            reclaim: false,
            offset: 100,
            length: 200,
            locker: locker4::New(open_to_lock_owner4 {
                open_seqid: 0,
                open_stateid,
                lock_seqid: 0,
                lock_owner: lock_owner4 { clientid: 0, owner: b"lock-owner-a".to_vec() },
            }),
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 2)];
    ops.extend(navigate_to_file());
    ops.push(lock);
    let reply = run_compound(&context, "lock", 1, &ops).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 4);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let lock_stateid: stateid4 = parsed.read();

    // A different owner probing the middle of the range is denied with the
    // holder's description.
    let lockt = op(
        nfs_opnum4::OP_LOCKT,
        &encode(&LOCKT4args {
            locktype: nfs_lock_type4::WRITE_LT,
            owner: lock_owner4 { clientid: 0, owner: b"prober".to_vec() },
            offset: 150,
            length: 10,
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 3)];
    ops.extend(navigate_to_file());
    ops.push(lockt.clone());
    let reply = run_compound(&context, "lockt", 1, &ops).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4ERR_DENIED);
    skip_results(&mut parsed, 4);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4ERR_DENIED);
    let denied: LOCK4denied = parsed.read();
    assert_eq!(denied.offset, 100);
    assert_eq!(denied.length, 200);
    assert_eq!(denied.owner.owner, b"lock-owner-a");

    // Unlock, then the probe succeeds.
    let locku = op(
        nfs_opnum4::OP_LOCKU,
        &encode(&LOCKU4args {
            locktype: nfs_lock_type4::WRITE_LT,
            seqid: 0,
            lock_stateid,
            offset: 100,
            length: 200,
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 4)];
    ops.extend(navigate_to_file());
    ops.push(locku);
    let reply = run_compound(&context, "locku", 1, &ops).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    skip_results(&mut parsed, 4);
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let bumped: stateid4 = parsed.read();
    assert!(bumped.seqid > lock_stateid.seqid);

    let mut ops = vec![sequence_op(sessionid, 5)];
    ops.extend(navigate_to_file());
    ops.push(lockt);
    let reply = run_compound(&context, "lockt2", 1, &ops).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4_OK);
}

#[tokio::test]
async fn eof_sentinel_lock_covers_the_tail() {
    let fs = Arc::new(MemFs::new());
    fs.add_file(b"locked.bin", &[0u8; 64]);
    let state = Arc::new(StateManager::new(StateConfig::default()));
    let (context, sessionid) = establish(Arc::clone(&fs), Arc::clone(&state), b"tail", 1).await;

    let open = op(
        nfs_opnum4::OP_OPEN,
        &encode(&OPEN4args {
            seqid: 0,
            share_access: OPEN4_SHARE_ACCESS_BOTH,
            share_deny: OPEN4_SHARE_DENY_NONE,
            owner: open_owner4 { clientid: 0, owner: b"tail-owner".to_vec() },
            openhow: openflag4::NoCreate,
            claim: open_claim4::NullNamed("locked.bin".into()),
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 1), op(nfs_opnum4::OP_PUTROOTFH, &[])];
    ops.push(op(nfs_opnum4::OP_LOOKUP, &encode(&LOOKUP4args { objname: "export".into() })));
    ops.push(open);
    let reply = run_compound(&context, "open", 1, &ops).await;
    let mut parsed = parse_reply(&reply);
    skip_results(&mut parsed, 3);
    parsed.next_result();
    let open_stateid = parse_open_stateid(&mut parsed);

    // Lock from 1000 to end of file using the sentinel length.
    let lock = op(
        nfs_opnum4::OP_LOCK,
        &encode(&LOCK4args {
            locktype: nfs_lock_type4::WRITE_LT,
            reclaim: false,
            offset: 1000,
            length: NFS4_LENGTH_EOF,
            locker: locker4::New(open_to_lock_owner4 {
                open_seqid: 0,
                open_stateid,
                lock_seqid: 0,
                lock_owner: lock_owner4 { clientid: 0, owner: b"tail-lock".to_vec() },
            }),
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 2)];
    ops.extend(navigate_to_file());
    ops.push(lock);
    let reply = run_compound(&context, "lock", 1, &ops).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4_OK);

    // A probe far past the original offset still collides.
    let lockt = op(
        nfs_opnum4::OP_LOCKT,
        &encode(&LOCKT4args {
            locktype: nfs_lock_type4::READ_LT,
            owner: lock_owner4 { clientid: 0, owner: b"probe".to_vec() },
            offset: 1 << 40,
            length: 1,
        }),
    );
    let mut ops = vec![sequence_op(sessionid, 3)];
    ops.extend(navigate_to_file());
    ops.push(lockt);
    let reply = run_compound(&context, "probe", 1, &ops).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_DENIED);
}
