//! v4.1 session lifecycle through the engine: EXCHANGE_ID,
//! CREATE_SESSION, SEQUENCE gating, reply caching and misorder detection.

mod support;

use std::sync::Arc;

use nfs_sable::xdr::nfs4::session::{
    channel_attrs4, client_owner4, state_protect4_a, CREATE_SESSION4args, EXCHANGE_ID4args,
    SEQUENCE4args,
};
use nfs_sable::xdr::nfs4::{nfs_opnum4, nfsstat4, sessionid4};

use support::{encode, op, parse_reply, run_compound, test_context, MemFs, Reply};

/// Consumes the SEQUENCE4resok body that follows a successful SEQUENCE
/// result's opcode/status pair.
fn skip_sequence_resok(parsed: &mut Reply) {
    let _sessionid: sessionid4 = parsed.read();
    let _sequenceid: u32 = parsed.read();
    let _slotid: u32 = parsed.read();
    let _highest_slotid: u32 = parsed.read();
    let _target_highest_slotid: u32 = parsed.read();
    let _status_flags: u32 = parsed.read();
}

fn exchange_id_op(owner: &[u8]) -> Vec<u8> {
    let args = EXCHANGE_ID4args {
        eia_clientowner: client_owner4 { co_verifier: [1; 8], co_ownerid: owner.to_vec() },
        eia_flags: 0,
        eia_state_protect: state_protect4_a::None,
        eia_client_impl_id: Vec::new(),
    };
    op(nfs_opnum4::OP_EXCHANGE_ID, &encode(&args))
}

fn create_session_op(clientid: u64, sequence: u32) -> Vec<u8> {
    let attrs = channel_attrs4 {
        ca_maxrequestsize: 1 << 20,
        ca_maxresponsesize: 1 << 20,
        ca_maxresponsesize_cached: 4096,
        ca_maxoperations: 16,
        ca_maxrequests: 8,
        ..Default::default()
    };
    let args = CREATE_SESSION4args {
        csa_clientid: clientid,
        csa_sequence: sequence,
        csa_flags: 0,
        csa_fore_chan_attrs: attrs.clone(),
        csa_back_chan_attrs: attrs,
        csa_cb_program: 0x40000000,
        csa_sec_parms: vec![Default::default()],
    };
    op(nfs_opnum4::OP_CREATE_SESSION, &encode(&args))
}

fn sequence_op(sessionid: sessionid4, seqid: u32, slot: u32, cache: bool) -> Vec<u8> {
    let args = SEQUENCE4args {
        sa_sessionid: sessionid,
        sa_sequenceid: seqid,
        sa_slotid: slot,
        sa_highest_slotid: 7,
        sa_cachethis: cache,
    };
    op(nfs_opnum4::OP_SEQUENCE, &encode(&args))
}

/// Runs EXCHANGE_ID then CREATE_SESSION, returning (clientid, sessionid).
async fn setup_session(context: &nfs_sable::protocol::rpc::Context, owner: &[u8]) -> (u64, sessionid4) {
    let reply = run_compound(context, "eid", 1, &[exchange_id_op(owner)]).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK, "EXCHANGE_ID failed");
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let clientid: u64 = parsed.read();
    let sequenceid: u32 = parsed.read();

    let reply = run_compound(context, "cs", 1, &[create_session_op(clientid, sequenceid)]).await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK, "CREATE_SESSION failed");
    let (_, status) = parsed.next_result();
    assert_eq!(status, nfsstat4::NFS4_OK);
    let sessionid: sessionid4 = parsed.read();
    (clientid, sessionid)
}

#[tokio::test]
async fn session_negotiation_and_sequenced_compound() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-one").await;

    let reply = run_compound(
        &context,
        "seq",
        1,
        &[sequence_op(sessionid, 1, 0, false), op(nfs_opnum4::OP_PUTROOTFH, &[])],
    )
    .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4_OK);
    assert_eq!(parsed.numresults, 2);
    let (opcode, status) = parsed.next_result();
    assert_eq!(opcode, nfs_opnum4::OP_SEQUENCE);
    assert_eq!(status, nfsstat4::NFS4_OK);
    let echoed: sessionid4 = parsed.read();
    assert_eq!(echoed, sessionid);
}

#[tokio::test]
async fn cached_sequence_replay_is_byte_identical() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-two").await;

    let ops =
        [sequence_op(sessionid, 1, 0, true), op(nfs_opnum4::OP_PUTROOTFH, &[])];
    let first = run_compound(&context, "replay", 1, &ops).await;
    let second = run_compound(&context, "replay", 1, &ops).await;
    // Replay purity: the cached bytes are served verbatim.
    assert_eq!(first, second);

    // The slot accepts the successor afterwards, so the busy flag was
    // released by the replay path.
    let third = run_compound(
        &context,
        "next",
        1,
        &[sequence_op(sessionid, 2, 0, true), op(nfs_opnum4::OP_PUTROOTFH, &[])],
    )
    .await;
    assert_eq!(parse_reply(&third).status, nfsstat4::NFS4_OK);
}

#[tokio::test]
async fn uncached_replay_is_refused() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-three").await;

    let ops = [sequence_op(sessionid, 1, 0, false), op(nfs_opnum4::OP_PUTROOTFH, &[])];
    let first = run_compound(&context, "once", 1, &ops).await;
    assert_eq!(parse_reply(&first).status, nfsstat4::NFS4_OK);

    let second = run_compound(&context, "once", 1, &ops).await;
    let mut parsed = parse_reply(&second);
    assert_eq!(parsed.status, nfsstat4::NFS4ERR_RETRY_UNCACHED_REP);
    assert_eq!(parsed.next_result().1, nfsstat4::NFS4ERR_RETRY_UNCACHED_REP);
}

#[tokio::test]
async fn misordered_sequence_is_refused_and_slot_unharmed() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-four").await;

    let reply = run_compound(
        &context,
        "gap",
        1,
        &[sequence_op(sessionid, 5, 0, false), op(nfs_opnum4::OP_PUTROOTFH, &[])],
    )
    .await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_SEQ_MISORDERED);

    // The misorder did not mutate the slot: seqid 1 still works.
    let reply = run_compound(
        &context,
        "ok",
        1,
        &[sequence_op(sessionid, 1, 0, false), op(nfs_opnum4::OP_PUTROOTFH, &[])],
    )
    .await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4_OK);
}

#[tokio::test]
async fn bad_slot_and_bad_session_are_reported() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-five").await;

    let reply = run_compound(&context, "slot", 1, &[sequence_op(sessionid, 1, 999, false)]).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_BADSLOT);

    let reply = run_compound(&context, "sess", 1, &[sequence_op([9u8; 16], 1, 0, false)]).await;
    assert_eq!(parse_reply(&reply).status, nfsstat4::NFS4ERR_BADSESSION);
}

#[tokio::test]
async fn sequence_must_come_first() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-six").await;

    let reply = run_compound(
        &context,
        "pos",
        1,
        &[
            sequence_op(sessionid, 1, 0, false),
            sequence_op(sessionid, 2, 1, false),
        ],
    )
    .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4ERR_SEQUENCE_POS);
    assert_eq!(parsed.numresults, 2);
    parsed.next_result();
    skip_sequence_resok(&mut parsed);
    assert_eq!(parsed.next_result(), (nfs_opnum4::OP_SEQUENCE, nfsstat4::NFS4ERR_SEQUENCE_POS));
}

#[tokio::test]
async fn removed_v40_ops_are_refused_in_session() {
    let context = test_context(Arc::new(MemFs::new()));
    let (_clientid, sessionid) = setup_session(&context, b"client-seven").await;

    let reply = run_compound(
        &context,
        "old",
        1,
        &[sequence_op(sessionid, 1, 0, false), op(nfs_opnum4::OP_RENEW, &[])],
    )
    .await;
    let mut parsed = parse_reply(&reply);
    assert_eq!(parsed.status, nfsstat4::NFS4ERR_NOTSUPP);
    parsed.next_result();
    skip_sequence_resok(&mut parsed);
    assert_eq!(parsed.next_result(), (nfs_opnum4::OP_RENEW, nfsstat4::NFS4ERR_NOTSUPP));
}

#[tokio::test]
async fn create_session_sequence_replay_and_misorder() {
    let context = test_context(Arc::new(MemFs::new()));
    let reply = run_compound(&context, "eid", 1, &[exchange_id_op(b"client-eight")]).await;
    let mut parsed = parse_reply(&reply);
    parsed.next_result();
    let clientid: u64 = parsed.read();
    let sequenceid: u32 = parsed.read();

    let first = run_compound(&context, "cs", 1, &[create_session_op(clientid, sequenceid)]).await;
    assert_eq!(parse_reply(&first).status, nfsstat4::NFS4_OK);

    // Replaying the same sequence returns the cached session result.
    let replay = run_compound(&context, "cs", 1, &[create_session_op(clientid, sequenceid)]).await;
    assert_eq!(first, replay);

    // Skipping ahead is misordered.
    let skipped =
        run_compound(&context, "cs", 1, &[create_session_op(clientid, sequenceid + 5)]).await;
    assert_eq!(parse_reply(&skipped).status, nfsstat4::NFS4ERR_SEQ_MISORDERED);
}
