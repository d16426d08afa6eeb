//! End-to-end pipeline scenarios against an in-memory chain pair and a
//! throwaway SQLite store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use tngate_chain::mock::{MockChain, ScriptedSend};
use tngate_chain::{Block, Chain, ChainClient, ChainTx};
use tngate_store::{Direction, ErrorReason, Storage, TunnelStatus};

use crate::controller::{Controller, ControllerConfig, HealthSnapshot};
use crate::policy::{AmountLimits, SideFees};
use crate::verifier::{Verifier, VerifyOutcome};
use crate::watcher::{Watcher, WatcherConfig};

const K: u64 = 5;

struct Harness {
    storage: Storage,
    tn: Arc<MockChain>,
    other: Arc<MockChain>,
    /// TN -> Other instance.
    watcher: Watcher,
    verifier: Verifier,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    harness_with_attempts(3).await
}

async fn harness_with_attempts(max_attempts: i64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::load_or_initialize(dir.path().join("gateway.db"))
        .await
        .unwrap();
    let tn = Arc::new(MockChain::new(Chain::Tn, "tn1"));
    let other = Arc::new(MockChain::new(Chain::Other, "0x"));

    let verifier = Verifier::new(
        storage.clone(),
        tn.clone() as Arc<dyn ChainClient>,
        other.clone() as Arc<dyn ChainClient>,
        K,
        K,
        max_attempts,
    );
    let watcher = Watcher::new(
        tn.clone(),
        other.clone(),
        storage.clone(),
        verifier.clone(),
        WatcherConfig {
            chain: Chain::Tn,
            direction: Direction::Tn2Other,
            gateway_address: tn.address("gateway"),
            confirmations: K,
            tick: Duration::from_millis(10),
            decimals: 6,
            limits: AmountLimits { min: 0.5, max: 100.0 },
            destination_fees: SideFees {
                gateway_fee: 0.1,
                network_fee: 0.01,
            },
        },
    );

    Harness {
        storage,
        tn,
        other,
        watcher,
        verifier,
        _dir: dir,
    }
}

/// The Other -> TN instance over the same storage and chain pair.
fn other_watcher(h: &Harness) -> Watcher {
    Watcher::new(
        h.other.clone(),
        h.tn.clone(),
        h.storage.clone(),
        h.verifier.clone(),
        WatcherConfig {
            chain: Chain::Other,
            direction: Direction::Other2Tn,
            gateway_address: h.other.address("gateway"),
            confirmations: K,
            tick: Duration::from_millis(10),
            decimals: 6,
            limits: AmountLimits { min: 0.5, max: 100.0 },
            destination_fees: SideFees {
                gateway_fee: 0.2,
                network_fee: 0.05,
            },
        },
    )
}

fn controller(h: &Harness, sending_timeout: Duration) -> Controller {
    Controller::new(
        h.storage.clone(),
        h.tn.clone(),
        h.other.clone(),
        h.verifier.clone(),
        ControllerConfig {
            interval: Duration::from_millis(10),
            sending_timeout,
            recheck_grace: Duration::from_millis(0),
            tn_decimals: 6,
            other_decimals: 6,
        },
        Arc::new(Mutex::new(HealthSnapshot::default())),
    )
}

fn deposit(id: &str, sender: &str, recipient: &str, amount: u128, attachment: Option<&str>) -> ChainTx {
    ChainTx {
        id: id.to_owned(),
        sender: sender.to_owned(),
        recipient: recipient.to_owned(),
        amount,
        attachment: attachment.map(str::to_owned),
    }
}

#[tokio::test]
async fn happy_path_tn_deposit_reaches_verified() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.other.set_tip(500);
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 1_000_000, Some("0xBEEF"))],
    });

    h.watcher.process_block(100).await.unwrap();

    let executed = h.storage.list_executed().await.unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].amount, 1.0);
    assert!((executed[0].fee - 0.11).abs() < 1e-9);
    assert_eq!(executed[0].inbound_txid, "t1");
    assert_eq!(executed[0].direction, Direction::Tn2Other);

    // fees deducted, target normalized
    let sends = h.other.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].to, "0xbeef");
    assert!((sends[0].amount - 0.89).abs() < 1e-9);

    let tunnel = h.storage.tunnel_by_source(&alice).await.unwrap().unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Verifying);

    // mined at tip 500; not deep enough until the chain advances k blocks
    let txid = executed[0].outbound_txid.clone();
    assert_eq!(
        h.verifier.check(&txid, Direction::Tn2Other).await.unwrap(),
        VerifyOutcome::Pending
    );

    h.other.advance_tip(K);
    assert_eq!(
        h.verifier.check(&txid, Direction::Tn2Other).await.unwrap(),
        VerifyOutcome::Verified
    );

    let tunnel = h.storage.tunnel_by_source(&alice).await.unwrap().unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Verified);
    let verified = h
        .storage
        .verified_for(&txid, Direction::Tn2Other)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(verified.height, 500);
    assert!(h
        .storage
        .get_verify(&txid, Direction::Tn2Other)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn amount_below_minimum_is_rejected() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 400_000, Some("0xBEEF"))],
    });
    h.watcher.process_block(100).await.unwrap();

    assert!(h.storage.list_executed().await.unwrap().is_empty());
    assert!(h.other.sends().is_empty());
    assert!(h.storage.tunnel_by_source(&alice).await.unwrap().is_none());

    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, ErrorReason::SendError);
    assert_eq!(errors[0].detail, "outside amount ranges");
    assert_eq!(errors[0].amount, 0.4);
    assert_eq!(errors[0].inbound_txid, "t1");
}

#[tokio::test]
async fn invalid_target_address_is_rejected() {
    let h = harness().await;

    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit(
            "t1",
            &h.tn.address("alice"),
            &h.tn.address("gateway"),
            1_000_000,
            Some("not-an-address"),
        )],
    });
    h.watcher.process_block(100).await.unwrap();

    assert!(h.other.sends().is_empty());
    assert!(h.storage.list_executed().await.unwrap().is_empty());

    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, ErrorReason::TxError);
}

#[tokio::test]
async fn deposit_without_attachment_is_rejected() {
    let h = harness().await;

    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &h.tn.address("alice"), &h.tn.address("gateway"), 1_000_000, None)],
    });
    h.watcher.process_block(100).await.unwrap();

    assert!(h.other.sends().is_empty());
    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, ErrorReason::NoAttachment);
}

#[tokio::test]
async fn rescanned_block_sends_exactly_once() {
    let h = harness().await;

    h.other.set_tip(500);
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit(
            "t1",
            &h.tn.address("alice"),
            &h.tn.address("gateway"),
            1_000_000,
            Some("0xBEEF"),
        )],
    });

    // cursor backed up after a transient failure: the block runs twice
    h.watcher.process_block(100).await.unwrap();
    h.watcher.process_block(100).await.unwrap();

    assert_eq!(h.storage.list_executed().await.unwrap().len(), 1);
    assert_eq!(h.other.sends().len(), 1);
}

#[tokio::test]
async fn unmined_outbound_exhausts_attempts_into_error() {
    let h = harness_with_attempts(3).await;
    let alice = h.tn.address("alice");

    h.other.set_tip(500);
    h.other.script_send(ScriptedSend::AcceptUnmined);
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 1_000_000, Some("0xBEEF"))],
    });
    h.watcher.process_block(100).await.unwrap();

    let executed = h.storage.list_executed().await.unwrap();
    let txid = executed[0].outbound_txid.clone();

    // the inline post-send check already burned one attempt
    let mut outcome = VerifyOutcome::Pending;
    for _ in 0..4 {
        outcome = h.verifier.check(&txid, Direction::Tn2Other).await.unwrap();
        if outcome == VerifyOutcome::Failed {
            break;
        }
    }
    assert_eq!(outcome, VerifyOutcome::Failed);

    let tunnel = h.storage.tunnel_by_source(&alice).await.unwrap().unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Error);
    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, ErrorReason::Manual);
    assert_eq!(errors[0].detail, "tx not found");
    assert_eq!(errors[0].outbound_txid, txid);
    assert!(h
        .storage
        .get_verify(&txid, Direction::Tn2Other)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn stuck_sending_is_swept_and_rescan_resubmits() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    // crashed after the tunnel went to `sending` but before the send
    h.storage
        .insert_tunnel(TunnelStatus::Sending, &alice, "0xbeef")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    controller(&h, Duration::from_millis(0)).tick().await.unwrap();

    let tunnel = h.storage.tunnel_by_source(&alice).await.unwrap().unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Error);
    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reason, ErrorReason::SendLost);
    assert_eq!(errors[0].detail, "send lost");

    // restart re-scans the deposit block and re-submits
    h.other.set_tip(500);
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 1_000_000, Some("0xBEEF"))],
    });
    h.watcher.process_block(100).await.unwrap();

    let executed = h.storage.list_executed().await.unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Verifying
    );

    // and the transfer completes through the normal path
    h.other.advance_tip(K);
    assert_eq!(
        h.verifier
            .check(&executed[0].outbound_txid, Direction::Tn2Other)
            .await
            .unwrap(),
        VerifyOutcome::Verified
    );
}

#[tokio::test]
async fn sweep_spares_sending_tunnels_with_an_executed_row() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.storage
        .insert_tunnel(TunnelStatus::Sending, &alice, "0xbeef")
        .await
        .unwrap();
    h.storage
        .insert_executed(&alice, "0xbeef", "out1", "in1", 1.0, 0.11, Direction::Tn2Other)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    controller(&h, Duration::from_millis(0)).tick().await.unwrap();

    // the send happened; not the sweep's business
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Sending
    );
    assert_eq!(h.storage.error_count().await.unwrap(), 0);
}

#[tokio::test]
async fn errored_tunnel_heals_once_outbound_appears() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.storage
        .insert_tunnel(TunnelStatus::Error, &alice, "0xbeef")
        .await
        .unwrap();
    h.storage
        .insert_executed(&alice, "0xbeef", "out1", "in1", 1.0, 0.11, Direction::Tn2Other)
        .await
        .unwrap();

    // not on-chain yet: nothing changes
    controller(&h, Duration::from_secs(3600)).tick().await.unwrap();
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Error
    );

    // the outbound tx shows up after all: back into verification
    h.other.set_tip(500);
    h.other.mine("out1", 495);
    controller(&h, Duration::from_secs(3600)).tick().await.unwrap();

    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Verifying
    );
    assert!(h
        .storage
        .get_verify("out1", Direction::Tn2Other)
        .await
        .unwrap()
        .is_some());

    // and the re-driven verifier completes it (depth 5 at tip 500)
    assert_eq!(
        h.verifier.check("out1", Direction::Tn2Other).await.unwrap(),
        VerifyOutcome::Verified
    );
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Verified
    );
}

#[tokio::test]
async fn registry_path_routes_other_deposits_through_tunnels() {
    let h = harness().await;
    let watcher = other_watcher(&h);
    let issued = h.other.address("issued1");
    let bob = h.tn.address("bob");

    h.storage
        .insert_tunnel(TunnelStatus::Created, &issued, &bob)
        .await
        .unwrap();

    h.tn.set_tip(200);
    h.other.push_block(Block {
        height: 700,
        transactions: vec![deposit("o1", &h.other.address("whale"), &issued, 2_000_000, None)],
    });
    watcher.process_block(700).await.unwrap();

    let executed = h.storage.list_executed().await.unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].direction, Direction::Other2Tn);
    assert_eq!(executed[0].amount, 2.0);
    assert!((executed[0].fee - 0.25).abs() < 1e-9);

    let sends = h.tn.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].to, bob);
    assert!((sends[0].amount - 1.75).abs() < 1e-9);

    assert_eq!(
        h.storage.tunnel_by_source(&issued).await.unwrap().unwrap().status,
        TunnelStatus::Verifying
    );
}

#[tokio::test]
async fn transfers_to_unknown_addresses_are_ignored() {
    let h = harness().await;
    let watcher = other_watcher(&h);

    h.other.push_block(Block {
        height: 700,
        transactions: vec![deposit(
            "o1",
            &h.other.address("whale"),
            &h.other.address("stranger"),
            2_000_000,
            None,
        )],
    });
    watcher.process_block(700).await.unwrap();

    assert!(h.storage.list_executed().await.unwrap().is_empty());
    assert_eq!(h.storage.error_count().await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_send_moves_tunnel_to_error() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.other.script_send(ScriptedSend::Reject("insufficient funds".into()));
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 1_000_000, Some("0xBEEF"))],
    });
    h.watcher.process_block(100).await.unwrap();

    assert!(h.storage.list_executed().await.unwrap().is_empty());
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Error
    );
    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors[0].reason, ErrorReason::SendError);
    assert_eq!(errors[0].detail, "insufficient funds");
}

#[tokio::test]
async fn ambiguous_send_failure_requires_manual_intervention() {
    let h = harness().await;
    let alice = h.tn.address("alice");

    h.other.script_send(ScriptedSend::Fail("connection reset".into()));
    h.tn.push_block(Block {
        height: 100,
        transactions: vec![deposit("t1", &alice, &h.tn.address("gateway"), 1_000_000, Some("0xBEEF"))],
    });
    h.watcher.process_block(100).await.unwrap();

    assert!(h.storage.list_executed().await.unwrap().is_empty());
    assert_eq!(
        h.storage.tunnel_by_source(&alice).await.unwrap().unwrap().status,
        TunnelStatus::Error
    );
    let errors = h.storage.list_errors().await.unwrap();
    assert_eq!(errors[0].reason, ErrorReason::Manual);
    assert_eq!(errors[0].detail, "tx failed to send - manual intervention required");
}

#[tokio::test]
async fn cursor_advances_only_past_confirmed_blocks() {
    let h = harness().await;
    h.storage.ensure_height(Chain::Tn, 99).await.unwrap();
    let mut cursor = 99;

    // tip - k < next: nothing to do yet
    h.tn.set_tip(104);
    assert!(!h.watcher.tick(&mut cursor).await.unwrap());
    assert_eq!(cursor, 99);
    assert_eq!(h.storage.get_height(Chain::Tn).await.unwrap(), Some(99));

    h.tn.set_tip(105);
    assert!(h.watcher.tick(&mut cursor).await.unwrap());
    assert_eq!(cursor, 100);
    assert_eq!(h.storage.get_height(Chain::Tn).await.unwrap(), Some(100));
}

#[tokio::test]
async fn controller_publishes_health() {
    let h = harness().await;
    h.tn.set_tip(120);
    h.other.set_tip(840);
    h.tn.set_balance(5_000_000);
    h.other.set_balance(9_000_000);
    h.storage.ensure_height(Chain::Tn, 100).await.unwrap();
    h.storage.ensure_height(Chain::Other, 800).await.unwrap();

    let health = Arc::new(Mutex::new(HealthSnapshot::default()));
    let controller = Controller::new(
        h.storage.clone(),
        h.tn.clone(),
        h.other.clone(),
        h.verifier.clone(),
        ControllerConfig {
            interval: Duration::from_millis(10),
            sending_timeout: Duration::from_secs(3600),
            recheck_grace: Duration::from_secs(3600),
            tn_decimals: 6,
            other_decimals: 6,
        },
        health.clone(),
    );
    controller.tick().await.unwrap();

    let snapshot = health.lock().clone();
    assert!(snapshot.is_ok());
    assert_eq!(snapshot.blocks_behind_tn, 20);
    assert_eq!(snapshot.blocks_behind_other, 40);
    assert_eq!(snapshot.balance_tn, 5.0);
    assert_eq!(snapshot.balance_other, 9.0);
    assert_eq!(snapshot.number_errors, 0);
    assert!(snapshot.updated_at.is_some());
}

#[tokio::test]
async fn watcher_stops_on_shutdown() {
    let h = harness().await;
    h.tn.set_tip(10);

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    h.watcher.run(shutdown).await.unwrap();
}
