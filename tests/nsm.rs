//! NSM crash fan-out: registrations survive delivery, unreachable targets
//! are declared crashed and their hook fires.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use nfs_sable::protocol::nsm::{notify, MonitorSet};
use nfs_sable::xdr::nsm as nsm_xdr;
use nfs_sable::xdr::{deserialize, Serialize};

fn registration(mon_name: &[u8], callback_addr: &str) -> nsm_xdr::mon {
    nsm_xdr::mon {
        mon_id: nsm_xdr::mon_id {
            mon_name: mon_name.to_vec(),
            my_id: nsm_xdr::my_id {
                my_name: callback_addr.as_bytes().to_vec(),
                my_prog: 100021,
                my_vers: 4,
                my_proc: 16,
            },
        },
        private: [0xAB; 16],
    }
}

/// A minimal SM_NOTIFY responder: accepts one connection, reads the
/// record-marked call, replies with an accepted RPC reply. Returns the
/// decoded notification body.
fn spawn_notify_responder(listener: TcpListener) -> tokio::task::JoinHandle<nsm_xdr::stat_chge> {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut header = [0u8; 4];
        socket.read_exact(&mut header).await.expect("record header");
        let len = (u32::from_be_bytes(header) & ((1 << 31) - 1)) as usize;
        let mut record = vec![0u8; len];
        socket.read_exact(&mut record).await.expect("record body");

        let mut cursor = std::io::Cursor::new(record);
        let msg: nfs_sable::xdr::rpc::rpc_msg = deserialize(&mut cursor).expect("rpc call");
        let body: nsm_xdr::stat_chge = deserialize(&mut cursor).expect("stat_chge");

        let mut reply = Vec::new();
        nfs_sable::xdr::rpc::make_success_reply(msg.xid).serialize(&mut reply).unwrap();
        let header = (reply.len() as u32) | (1 << 31);
        socket.write_all(&header.to_be_bytes()).await.unwrap();
        socket.write_all(&reply).await.unwrap();
        body
    })
}

#[tokio::test]
async fn crash_fan_out_keeps_live_clients_and_flushes_dead_ones() {
    let monitor = Arc::new(MonitorSet::new(16));

    // One live responder and one address nobody listens on.
    let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = live_listener.local_addr().unwrap().to_string();
    let dead_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead_listener.local_addr().unwrap().to_string();
    drop(dead_listener);

    monitor.mon(registration(b"live-host", &live_addr));
    monitor.mon(registration(b"dead-host", &dead_addr));

    let crashed = Arc::new(Mutex::new(Vec::<String>::new()));
    {
        let crashed = Arc::clone(&crashed);
        monitor.set_crash_hook(Box::new(move |host| {
            crashed.lock().unwrap().push(host.to_string());
        }));
    }

    let responder = spawn_notify_responder(live_listener);
    let failures = notify::notify_all(&monitor, "server-host").await;
    assert_eq!(failures, 1);

    // The live client's registration remains; the dead one is gone and its
    // hook fired with the registered name.
    let remaining = monitor.registrations();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mon_id.mon_name, b"live-host");
    assert_eq!(crashed.lock().unwrap().as_slice(), &["dead-host".to_string()]);

    // The delivered message carried our name, state and the registered
    // cookie.
    let message = responder.await.unwrap();
    assert_eq!(message.mon_name, b"server-host");
    assert_eq!(message.state, monitor.state());
    assert_eq!(message.private, [0xAB; 16]);
}

#[tokio::test]
async fn notify_state_counter_is_odd_and_advances_on_simulated_crash() {
    let monitor = MonitorSet::new(4);
    let initial = monitor.state();
    assert_eq!(initial % 2, 1);
    let after = monitor.simulate_crash();
    assert_eq!(after, initial + 2);
}

#[tokio::test]
async fn crash_hook_releases_nlm_prefixed_lock_owners() {
    use nfs_sable::state::{StateConfig, StateManager};
    use nfs_sable::xdr::nfs4::lock::{lock_owner4, nfs_lock_type4};
    use nfs_sable::xdr::nfs4::session::channel_attrs4;

    let state = Arc::new(StateManager::new(StateConfig::default()));
    let (clientid, seq, _) = state.exchange_id(b"nlm-gateway", [1; 8]).unwrap();
    let attrs = channel_attrs4 { ca_maxrequests: 4, ..Default::default() };
    state
        .create_session(clientid, seq, false, &attrs, &attrs, 0, Vec::new(), 1)
        .unwrap();
    let open = match state
        .open_file(clientid, b"owner", 0, true, b"fh", 3, 0, false)
        .unwrap()
    {
        nfs_sable::state::OpenOutcome::Granted { stateid, .. } => stateid,
        other => panic!("unexpected {other:?}"),
    };
    let nlm_owner = lock_owner4 { clientid, owner: b"nlm:crashed-host:77".to_vec() };
    state
        .lock_new(&open, 0, 0, &nlm_owner, nfs_lock_type4::WRITE_LT, 0, 100, false, true)
        .unwrap();

    // Wire the monitor's hook the way the TCP listener does.
    let monitor = MonitorSet::new(4);
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let state = Arc::clone(&state);
        let fired = Arc::clone(&fired);
        monitor.set_crash_hook(Box::new(move |host| {
            fired.fetch_add(1, Ordering::SeqCst);
            let prefix = format!("nlm:{host}:");
            state.release_lock_owners_with_prefix(prefix.as_bytes());
        }));
    }
    monitor.client_crashed(b"crashed-host");
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // The crashed host's lock is gone.
    let probe = lock_owner4 { clientid, owner: b"probe".to_vec() };
    assert!(state
        .test_lock_on_file(b"fh", &probe, nfs_lock_type4::WRITE_LT, 0, 100)
        .is_ok());
}
