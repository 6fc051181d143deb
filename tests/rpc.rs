//! RPC framing behavior through the socket message handler: record size
//! limits, version mismatches and full NFSv4 NULL round trips.

mod support;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use nfs_sable::protocol::rpc::{SocketMessageHandler, MAX_RPC_RECORD_LENGTH};
use nfs_sable::xdr::{self, deserialize, Serialize};

use support::{test_context, MemFs};

fn rpc_call(xid: u32, prog: u32, vers: u32, proc_num: u32) -> Vec<u8> {
    let call = xdr::rpc::call_body {
        rpcvers: 2,
        prog,
        vers,
        proc: proc_num,
        cred: xdr::rpc::opaque_auth::default(),
        verf: xdr::rpc::opaque_auth::default(),
    };
    let msg = xdr::rpc::rpc_msg { xid, body: xdr::rpc::rpc_body::CALL(call) };
    let mut buf = Vec::new();
    msg.serialize(&mut buf).expect("serialize rpc_msg");
    buf
}

async fn send_record(socksend: &mut tokio::io::DuplexStream, record: &[u8]) {
    let header = (1_u32 << 31) | (record.len() as u32);
    socksend.write_all(&header.to_be_bytes()).await.expect("write header");
    socksend.write_all(record).await.expect("write body");
}

#[tokio::test]
async fn rejects_oversized_rpc_fragment() {
    let context = test_context(Arc::new(MemFs::new()));
    let (mut handler, mut socksend, _msgrecv) = SocketMessageHandler::new(&context);

    let oversized = MAX_RPC_RECORD_LENGTH + 1;
    let fragment_header = (1_u32 << 31) | (oversized as u32);
    socksend.write_all(&fragment_header.to_be_bytes()).await.expect("write fragment header");

    let err = handler.read().await.expect_err("expected oversize error");
    assert!(err.to_string().contains("exceeds max"), "unexpected error: {err:?}");
}

#[tokio::test]
async fn nfs_null_round_trip() {
    let context = test_context(Arc::new(MemFs::new()));
    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&context);

    let xid = 77;
    let record = rpc_call(xid, 100003, 4, 0);
    send_record(&mut socksend, &record).await;
    handler.read().await.expect("handler read");

    let response = timeout(Duration::from_secs(1), msgrecv.recv())
        .await
        .expect("response timeout")
        .expect("response channel closed")
        .expect("response error");
    let reply =
        deserialize::<xdr::rpc::rpc_msg, _>(&mut Cursor::new(response)).expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    assert!(matches!(
        reply.body,
        xdr::rpc::rpc_body::REPLY(xdr::rpc::reply_body::MSG_ACCEPTED(_))
    ));
}

#[tokio::test]
async fn returns_prog_mismatch_for_nfsv3_request() {
    let context = test_context(Arc::new(MemFs::new()));
    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&context);

    let xid = 42;
    let record = rpc_call(xid, 100003, 3, 0);
    send_record(&mut socksend, &record).await;
    handler.read().await.expect("handler read");

    let response = timeout(Duration::from_secs(1), msgrecv.recv())
        .await
        .expect("response timeout")
        .expect("response channel closed")
        .expect("response error");

    let reply =
        deserialize::<xdr::rpc::rpc_msg, _>(&mut Cursor::new(response)).expect("deserialize reply");
    assert_eq!(reply.xid, xid);
    match reply.body {
        xdr::rpc::rpc_body::REPLY(xdr::rpc::reply_body::MSG_ACCEPTED(accepted)) => {
            match accepted.reply_data {
                xdr::rpc::accept_body::PROG_MISMATCH(info) => {
                    assert_eq!(info.low, 4);
                    assert_eq!(info.high, 4);
                }
                other => panic!("expected PROG_MISMATCH, got {:?}", other),
            }
        }
        other => panic!("expected MSG_ACCEPTED, got {:?}", other),
    }
}

#[tokio::test]
async fn retransmitted_xid_is_suppressed() {
    let context = test_context(Arc::new(MemFs::new()));
    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&context);

    let record = rpc_call(5, 100003, 4, 0);
    send_record(&mut socksend, &record).await;
    handler.read().await.expect("first read");
    let first = timeout(Duration::from_secs(1), msgrecv.recv()).await.expect("first reply");
    assert!(first.is_some());

    // The same xid from the same client produces no second reply.
    send_record(&mut socksend, &record).await;
    handler.read().await.expect("second read");
    let second = timeout(Duration::from_millis(200), msgrecv.recv()).await;
    assert!(second.is_err(), "retransmission should produce no reply");
}

#[tokio::test]
async fn portmap_getport_answers_for_nfs() {
    let context = test_context(Arc::new(MemFs::new()));
    let (mut handler, mut socksend, mut msgrecv) = SocketMessageHandler::new(&context);

    let mut record = rpc_call(9, 100000, 2, 3); // PMAPPROC_GETPORT
    xdr::portmap::mapping { prog: 100003, vers: 4, prot: xdr::portmap::IPPROTO_TCP, port: 0 }
        .serialize(&mut record)
        .unwrap();
    send_record(&mut socksend, &record).await;
    handler.read().await.expect("handler read");

    let response = timeout(Duration::from_secs(1), msgrecv.recv())
        .await
        .expect("response timeout")
        .expect("channel open")
        .expect("no rpc error");
    let mut cursor = Cursor::new(response);
    let _reply: xdr::rpc::rpc_msg = deserialize(&mut cursor).unwrap();
    let port: u32 = deserialize(&mut cursor).unwrap();
    assert_eq!(port, 2049);
}
