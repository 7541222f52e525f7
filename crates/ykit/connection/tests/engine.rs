//! Command engine behaviour: ordering, exclusivity, continuation, caching,
//! cancellation and timeouts

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use parking_lot::Mutex;
use ykit_apdu_core::transport::mock::{CommandLog, MockTransport};
use ykit_apdu_core::{ApduCommand, Application, Bytes, Command, Error};
use ykit_connection::{
    CancellationToken, CommandOptions, ConnectionConfig, Session, SessionBinding,
    SmartCardInterface,
};

mod common;

fn start(transport: MockTransport) -> SmartCardInterface {
    SmartCardInterface::start(Box::new(transport), &ConnectionConfig::new(), "test")
        .expect("engine starts")
}

fn ok() -> Bytes {
    Bytes::from_static(&[0x90, 0x00])
}

#[test]
fn test_entries_run_in_ticket_order() {
    let transport = MockTransport::with_handler(|_| Ok(ok()));
    let log = transport.log();
    let card = start(transport);

    let submitted = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let card = card.clone();
            let submitted = submitted.clone();
            thread::spawn(move || {
                let mut pending = Vec::new();
                for i in 0..10u8 {
                    let command = Command::new(0x00, 0x01, t, i);
                    let p = card.execute(command.clone());
                    submitted.lock().push((p.ticket(), command.to_bytes()));
                    pending.push(p);
                }
                for p in pending {
                    p.wait().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut expected = submitted.lock().clone();
    expected.sort_by_key(|(ticket, _)| *ticket);
    let expected: Vec<Bytes> = expected.into_iter().map(|(_, bytes)| bytes).collect();
    assert_eq!(log.sent(), expected);
}

#[test]
fn test_single_exchange_in_flight() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (flight, top) = (in_flight.clone(), peak.clone());
    let card = start(MockTransport::with_handler(move |_| {
        let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
        top.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let card = card.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    card.execute(Command::new(0, 0xA1, 0, 0)).wait().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_more_data_is_reassembled() {
    let transport = MockTransport::from_hex(&["01026103", "0304056101", "069000"]);
    let log = transport.log();
    let card = start(transport);

    let payload = card.execute(Command::new(0x00, 0xCB, 0x3F, 0xFF)).wait().unwrap();
    assert_eq!(payload.as_ref(), &[1, 2, 3, 4, 5, 6]);
    assert_eq!(log.sent_hex(), vec!["00cb3fff", "00c0000003", "00c0000001"]);
}

#[test]
fn test_oath_continuation_option() {
    let transport = MockTransport::from_hex(&["aa6101", "bb9000"]);
    let log = transport.log();
    let card = start(transport);

    let options = CommandOptions::new().with_send_remaining(ykit_apdu_core::SendRemaining::Oath);
    let payload = card
        .execute_with(Command::new(0x00, 0xA1, 0, 0), options)
        .wait()
        .unwrap();
    assert_eq!(payload.as_ref(), &[0xAA, 0xBB]);
    assert_eq!(log.sent_hex()[1], "00a50000");
}

#[test]
fn test_repeated_select_is_cached() {
    let transport = MockTransport::with_handler(|_| Ok(Bytes::from_static(&[0x79, 0x90, 0x00])));
    let log = transport.log();
    let card = start(transport);

    let first = card.select_application(Application::Oath).wait().unwrap();
    let second = card.select_application(Application::Oath).wait().unwrap();
    assert_eq!(first, second);
    assert_eq!(log.len(), 1);

    // FIDO2 and U2F share an AID
    card.select_application(Application::Fido2).wait().unwrap();
    card.select_application(Application::U2f).wait().unwrap();
    assert_eq!(log.len(), 2);
}

#[test]
fn test_raw_select_clears_cache() {
    let transport = MockTransport::with_handler(|_| Ok(Bytes::from_static(&[0x90, 0x00])));
    let log = transport.log();
    let card = start(transport);

    card.select_application(Application::Oath).wait().unwrap();
    card.execute(ykit_apdu_core::SelectApplication::new(Application::Piv))
        .wait()
        .unwrap();
    card.select_application(Application::Oath).wait().unwrap();
    assert_eq!(log.len(), 3);
}

#[test]
fn test_select_instruction_without_name_keeps_cache() {
    let transport = MockTransport::with_handler(|_| Ok(Bytes::from_static(&[0x90, 0x00])));
    let log = transport.log();
    let card = start(transport);

    card.select_application(Application::Oath).wait().unwrap();
    // OATH CALCULATE ALL shares the SELECT instruction byte
    card.execute(Command::new_with_data(0x00, 0xA4, 0x00, 0x01, vec![0x74, 0x00]))
        .wait()
        .unwrap();
    card.select_application(Application::Oath).wait().unwrap();
    assert_eq!(log.len(), 2);
}

#[test]
fn test_failed_select_is_not_cached() {
    let transport = MockTransport::from_hex(&["6a82", "9000"]);
    let log = transport.log();
    let card = start(transport);

    let err = card.select_application(Application::Piv).wait().unwrap_err();
    assert_eq!(err.status_error().map(|s| s.status.to_u16()), Some(0x6A82));
    card.select_application(Application::Piv).wait().unwrap();
    assert_eq!(log.len(), 2);
}

/// Blocks the worker inside its first exchange until released
fn gated_card() -> (SmartCardInterface, crossbeam_channel::Sender<()>, CommandLog) {
    let (release, gate) = bounded::<()>(0);
    let transport = MockTransport::with_handler(move |_| {
        let _ = gate.recv_timeout(common::WAIT);
        Ok(Bytes::from_static(&[0x90, 0x00]))
    });
    let log = transport.log();
    (start(transport), release, log)
}

#[test]
fn test_cancel_commands_drains_queue() {
    let (card, release, log) = gated_card();

    let running = card.execute(Command::new(0, 0x01, 0, 0));
    while log.is_empty() {
        thread::yield_now();
    }
    let queued: Vec<_> = (0..5u8)
        .map(|i| card.execute(Command::new(0, 0x02, i, 0)))
        .collect();

    assert_eq!(card.cancel_commands(), 5);
    release.send(()).unwrap();

    assert!(running.wait().is_ok());
    for pending in queued {
        assert_eq!(pending.wait(), Err(Error::Cancelled));
    }
    assert_eq!(log.len(), 1);
}

#[test]
fn test_cancellation_token_before_start() {
    let (card, release, log) = gated_card();
    let running = card.execute(Command::new(0, 0x01, 0, 0));

    let token = CancellationToken::new();
    let queued = card.execute_with(
        Command::new(0, 0x02, 0, 0),
        CommandOptions::new().with_token(token.clone()),
    );
    token.cancel();
    release.send(()).unwrap();

    assert!(running.wait().is_ok());
    assert_eq!(queued.wait(), Err(Error::Cancelled));
    assert_eq!(log.len(), 1);
}

#[test]
fn test_barrier_runs_after_earlier_entries() {
    let (card, release, log) = gated_card();
    let (order_tx, order_rx) = unbounded();

    let first = card.execute(Command::new(0, 0x01, 0, 0));
    while log.is_empty() {
        thread::yield_now();
    }
    let tx = order_tx.clone();
    first.on_complete(move |_| tx.send("command").unwrap());
    card.dispatch_after_current_commands(move || order_tx.send("barrier").unwrap());

    // barriers survive cancellation
    card.cancel_commands();
    release.send(()).unwrap();

    assert_eq!(common::next(&order_rx), "command");
    assert_eq!(common::next(&order_rx), "barrier");
}

#[test]
fn test_timeout_discards_late_response() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let card = start(MockTransport::with_handler(move |_| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => {
                thread::sleep(Duration::from_millis(200));
                Ok(Bytes::from_static(&[0x01, 0x90, 0x00]))
            }
            _ => Ok(Bytes::from_static(&[0x02, 0x90, 0x00])),
        }
    }));

    let options = CommandOptions::new().with_timeout(Duration::from_millis(50));
    let err = card
        .execute_with(Command::new(0, 0x01, 0, 0), options)
        .wait()
        .unwrap_err();
    assert!(err.is_timeout());

    let payload = card.execute(Command::new(0, 0x02, 0, 0)).wait().unwrap();
    assert_eq!(payload.as_ref(), &[0x02]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_shutdown_rejects_new_work() {
    let (card, release, log) = gated_card();
    let running = card.execute(Command::new(0, 0x01, 0, 0));
    while log.is_empty() {
        thread::yield_now();
    }
    let queued = card.execute(Command::new(0, 0x02, 0, 0));

    let closer = {
        let card = card.clone();
        thread::spawn(move || card.shutdown())
    };
    assert_eq!(queued.wait(), Err(Error::ConnectionClosed));
    release.send(()).unwrap();
    closer.join().unwrap();

    assert!(running.wait().is_ok());
    assert!(!card.is_open());
    let late = card.execute(Command::new(0, 0x03, 0, 0));
    assert_eq!(late.ticket(), 0);
    assert_eq!(late.wait(), Err(Error::ConnectionClosed));

    let (tx, rx) = unbounded();
    card.dispatch_after_current_commands(move || tx.send(()).unwrap());
    assert!(rx.try_recv().is_ok());
}

#[test]
fn test_task_spans_several_exchanges() {
    let transport = MockTransport::from_hex(&["9000", "019000", "029000"]);
    let log = transport.log();
    let card = start(transport);

    let sum = card
        .submit(CommandOptions::default(), |channel| {
            channel.select(Application::Oath)?;
            let a = channel.transmit(&Command::new(0, 0x10, 0, 0))?;
            let b = channel.transmit(&Command::new(0, 0x11, 0, 0))?;
            Ok::<_, Error>(a[0] + b[0])
        })
        .wait()
        .unwrap();
    assert_eq!(sum, 3);
    assert_eq!(log.len(), 3);
}

#[derive(Clone)]
struct PlainSession {
    card: SmartCardInterface,
    binding: SessionBinding,
}

impl Session for PlainSession {
    type Error = Error;

    fn application(&self) -> Application {
        Application::Oath
    }

    fn smart_card(&self) -> &SmartCardInterface {
        &self.card
    }

    fn binding(&self) -> &SessionBinding {
        &self.binding
    }
}

#[test]
fn test_other_selection_invalidates_session() {
    let card = start(MockTransport::with_handler(|_| Ok(Bytes::from_static(&[0x90, 0x00]))));
    let session = card
        .submit(CommandOptions::default(), {
            let card = card.clone();
            move |channel| {
                let (token, _) = channel.reselect(Application::Oath)?;
                Ok::<_, Error>(PlainSession {
                    card,
                    binding: SessionBinding::new(token),
                })
            }
        })
        .wait()
        .unwrap();

    session.execute(Command::new(0, 0xA1, 0, 0)).wait().unwrap();

    card.select_application(Application::Piv).wait().unwrap();
    assert_eq!(
        session.execute(Command::new(0, 0xA1, 0, 0)).wait(),
        Err(Error::SessionInvalidated)
    );

    session.select_application().wait().unwrap();
    session.execute(Command::new(0, 0xA1, 0, 0)).wait().unwrap();
}
