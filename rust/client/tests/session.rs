mod support;

use std::sync::Arc;

use ambient_client::{
    SdkController, SdkPhase, SdkState, WalletConnection, WalletSigner, WALLET_NOT_CONNECTED,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};

use support::{
    chain_config, felt, Ledger, MockSigner, MockTransport, SignerBehavior, EXPECTED_CHAIN,
    WRONG_CHAIN,
};

const ALICE: u64 = 0xa11ce;
const BOB: u64 = 0xb0b;

fn controller() -> SdkController<MockTransport> {
    SdkController::new(chain_config())
}

fn connect(account: u64, chain: u64, transport: &Arc<MockTransport>) -> WalletConnection<MockTransport> {
    WalletConnection::connected(felt(account), felt(chain), transport.clone())
}

fn assert_consistent(state: &SdkState<MockSigner>) {
    if state.is_ready() {
        assert!(state.engine().is_some(), "ready without engine");
        assert!(state.signer().is_some(), "ready without signer");
        assert!(state.error().is_none(), "ready with error");
        assert!(!state.is_loading());
    } else {
        assert!(state.engine().is_none());
        assert!(state.signer().is_none());
    }
    if state.is_loading() {
        assert!(state.error().is_none());
    }
}

#[tokio::test]
async fn starts_disconnected() {
    let controller = controller();
    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Disconnected);
    assert_eq!(state.error(), Some(WALLET_NOT_CONNECTED));
    assert_consistent(&state);
}

#[tokio::test]
async fn matching_connection_becomes_ready() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(EXPECTED_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    assert!(controller.snapshot().is_loading());
    controller.wait_idle().await;

    let state = controller.snapshot();
    assert!(state.is_ready());
    assert_consistent(&state);
    let signer = state.signer().expect("signer");
    assert_eq!(signer.address(), felt(ALICE));
    let engine = state.engine().expect("engine");
    assert_eq!(engine.chain_name(), "swell");
    assert!(Arc::ptr_eq(engine.signer(), signer));
}

#[tokio::test]
async fn wrong_chain_names_expected_and_actual() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(WRONG_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, WRONG_CHAIN, &transport));
    controller.wait_idle().await;

    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Error);
    let message = state.error().expect("error");
    assert!(message.contains("swell"), "{message}");
    assert!(message.contains("0x783"), "{message}");
    assert!(message.contains("0x1"), "{message}");
    assert_eq!(transport.signer_calls(), 0);
}

#[tokio::test]
async fn wallet_reporting_other_chain_is_rejected() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(WRONG_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    assert_eq!(controller.snapshot().phase(), SdkPhase::Error);
}

#[tokio::test]
async fn missing_signer_fails() {
    let controller = controller();
    let transport = Arc::new(
        MockTransport::new(EXPECTED_CHAIN, Ledger::new()).with_behavior(SignerBehavior::Missing),
    );
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Error);
    assert!(state.error().expect("error").contains("Failed to create signer"));
}

#[tokio::test]
async fn signer_address_mismatch_fails() {
    let controller = controller();
    let transport = Arc::new(
        MockTransport::new(EXPECTED_CHAIN, Ledger::new())
            .with_behavior(SignerBehavior::WrongAddress(BOB)),
    );
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Error);
    assert!(state.error().expect("error").contains("mismatch"));
    assert_consistent(&state);
}

#[tokio::test]
async fn signer_bound_to_other_chain_fails() {
    let controller = controller();
    let transport = Arc::new(
        MockTransport::new(EXPECTED_CHAIN, Ledger::new())
            .with_behavior(SignerBehavior::WrongChain(WRONG_CHAIN)),
    );
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    assert_eq!(controller.snapshot().phase(), SdkPhase::Error);
}

#[tokio::test]
async fn failed_liveness_check_is_not_fatal() {
    let controller = controller();
    let ledger = Ledger::new();
    let transport =
        Arc::new(MockTransport::new(EXPECTED_CHAIN, ledger.clone()).with_failing_liveness());
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    assert!(controller.snapshot().is_ready());
    assert_eq!(ledger.block_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_events_do_not_reinitialize() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(EXPECTED_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    let first = controller.snapshot();

    for _ in 0..5 {
        controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    }
    controller.wait_idle().await;
    let again = controller.snapshot();
    assert_eq!(transport.signer_calls(), 1);
    assert!(Arc::ptr_eq(
        first.engine().expect("engine"),
        again.engine().expect("engine")
    ));
}

#[tokio::test]
async fn failure_is_sticky_until_retry() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(WRONG_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, WRONG_CHAIN, &transport));
    controller.wait_idle().await;
    controller.connection_changed(connect(ALICE, WRONG_CHAIN, &transport));
    controller.wait_idle().await;
    assert_eq!(transport.chain_calls(), 1);

    controller.retry();
    controller.wait_idle().await;
    assert_eq!(transport.chain_calls(), 2);
    assert_eq!(controller.snapshot().phase(), SdkPhase::Error);
}

#[tokio::test]
async fn fresh_transport_after_failure_reinitializes() {
    let controller = controller();
    let ledger = Ledger::new();
    let broken = Arc::new(
        MockTransport::new(EXPECTED_CHAIN, ledger.clone()).with_behavior(SignerBehavior::Missing),
    );
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &broken));
    controller.wait_idle().await;
    assert_eq!(controller.snapshot().phase(), SdkPhase::Error);

    let working = Arc::new(MockTransport::new(EXPECTED_CHAIN, ledger));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &working));
    controller.wait_idle().await;
    assert!(controller.snapshot().is_ready());
}

#[tokio::test]
async fn account_switch_drops_old_handles() {
    let controller = controller();
    let transport = Arc::new(MockTransport::new(EXPECTED_CHAIN, Ledger::new()));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.wait_idle().await;
    assert!(controller.snapshot().is_ready());

    controller.connection_changed(connect(BOB, EXPECTED_CHAIN, &transport));
    let during = controller.snapshot();
    assert!(during.is_loading());
    assert!(during.engine().is_none() && during.signer().is_none());

    controller.wait_idle().await;
    let state = controller.snapshot();
    assert_eq!(state.signer().expect("signer").address(), felt(BOB));
}

#[tokio::test]
async fn stale_wrong_chain_attempt_yields_to_newer_connection() {
    let controller = controller();
    let ledger = Ledger::new();
    let (wrong, gate) = MockTransport::new(WRONG_CHAIN, ledger.clone()).gated();
    let wrong = Arc::new(wrong);
    let right = Arc::new(MockTransport::new(EXPECTED_CHAIN, ledger));

    controller.connection_changed(connect(ALICE, WRONG_CHAIN, &wrong));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &right));
    assert!(controller.snapshot().is_loading());
    assert_eq!(right.chain_calls(), 0);

    gate.add_permits(1);
    controller.wait_idle().await;

    let state = controller.snapshot();
    assert!(state.is_ready(), "final state: {:?}", state.error());
    assert_eq!(state.signer().expect("signer").chain_id(), felt(EXPECTED_CHAIN));
    assert_eq!(right.signer_calls(), 1);
}

#[tokio::test]
async fn stale_success_does_not_become_ready() {
    let controller = controller();
    let ledger = Ledger::new();
    let (right, gate) = MockTransport::new(EXPECTED_CHAIN, ledger.clone()).gated();
    let right = Arc::new(right);
    let wrong = Arc::new(MockTransport::new(WRONG_CHAIN, ledger));

    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &right));
    controller.connection_changed(connect(BOB, WRONG_CHAIN, &wrong));
    gate.add_permits(1);
    controller.wait_idle().await;

    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Error);
    assert!(state.signer().is_none());
}

#[tokio::test]
async fn disconnect_during_initialization_wins() {
    let controller = controller();
    let (transport, gate) = MockTransport::new(EXPECTED_CHAIN, Ledger::new()).gated();
    let transport = Arc::new(transport);

    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.connection_changed(WalletConnection::disconnected());
    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Disconnected);

    gate.add_permits(1);
    controller.wait_idle().await;
    let state = controller.snapshot();
    assert_eq!(state.phase(), SdkPhase::Disconnected);
    assert_eq!(state.error(), Some(WALLET_NOT_CONNECTED));
}

#[tokio::test]
async fn reconnect_after_disconnect_initializes_again() {
    let controller = controller();
    let (transport, gate) = MockTransport::new(EXPECTED_CHAIN, Ledger::new()).gated();
    let transport = Arc::new(transport);

    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    controller.connection_changed(WalletConnection::disconnected());
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    gate.add_permits(2);
    controller.wait_idle().await;

    assert!(controller.snapshot().is_ready());
    assert_eq!(transport.chain_calls(), 2);
}

#[tokio::test]
async fn subscribers_see_transitions() {
    let controller = controller();
    let mut rx = controller.subscribe();
    let transport = Arc::new(MockTransport::new(EXPECTED_CHAIN, Ledger::new()).with_delay(5));
    controller.connection_changed(connect(ALICE, EXPECTED_CHAIN, &transport));
    rx.changed().await.expect("initializing");
    loop {
        let phase = rx.borrow_and_update().phase();
        if phase == SdkPhase::Ready {
            break;
        }
        assert_eq!(phase, SdkPhase::Initializing);
        rx.changed().await.expect("ready");
    }
}

#[derive(Clone, Copy, Debug)]
enum Event {
    Good(u64),
    WrongChain,
    Mismatch,
    Disconnect,
}

/// Random event sequences: every observed state is consistent and the
/// settled state always matches the last connection.
#[tokio::test]
async fn random_event_sequences_keep_state_consistent() {
    const CAROL: u64 = 0xca201;
    for seed in 0..24u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let controller = controller();
        let ledger = Ledger::new();
        let good = Arc::new(MockTransport::new(EXPECTED_CHAIN, ledger.clone()).with_delay(1));
        let wrong = Arc::new(MockTransport::new(WRONG_CHAIN, ledger.clone()).with_delay(2));
        let mismatch = Arc::new(
            MockTransport::new(EXPECTED_CHAIN, ledger).with_behavior(SignerBehavior::WrongAddress(BOB)),
        );

        let mut last = Event::Disconnect;
        for _ in 0..30 {
            let event = match rng.gen_range(0..5) {
                0 => Event::Good(ALICE),
                1 => Event::Good(BOB),
                2 => Event::WrongChain,
                3 => Event::Mismatch,
                _ => Event::Disconnect,
            };
            let connection = match event {
                Event::Good(account) => connect(account, EXPECTED_CHAIN, &good),
                Event::WrongChain => connect(ALICE, WRONG_CHAIN, &wrong),
                Event::Mismatch => connect(CAROL, EXPECTED_CHAIN, &mismatch),
                Event::Disconnect => WalletConnection::disconnected(),
            };
            controller.connection_changed(connection);
            last = event;
            assert_consistent(&controller.snapshot());
            if rng.gen_bool(0.5) {
                sleep(Duration::from_millis(rng.gen_range(0..4))).await;
                assert_consistent(&controller.snapshot());
            }
        }

        controller.wait_idle().await;
        let state = controller.snapshot();
        assert_consistent(&state);
        match last {
            Event::Good(account) => {
                assert!(state.is_ready(), "seed {seed}: {:?}", state.error());
                assert_eq!(state.signer().expect("signer").address(), felt(account));
            }
            Event::WrongChain | Event::Mismatch => {
                assert_eq!(state.phase(), SdkPhase::Error, "seed {seed}")
            }
            Event::Disconnect => assert_eq!(state.phase(), SdkPhase::Disconnected, "seed {seed}"),
        }
    }
}
