//! FIDO2 session against a simulated authenticator

use std::time::Duration;

use ykit_apdu_core::Application;
use ykit_connection::Session;
use ykit_fido2::commands::KEEP_ALIVE_PROCESSING;
use ykit_fido2::{
    CredentialDescriptor, CtapStatus, Fido2Config, Fido2Error, Fido2Session, GetAssertionRequest,
    KeyState, MakeCredentialRequest, RelyingParty, User,
};

mod common;

use common::{AAGUID, Authenticator, MAX_RETRIES, device};

const CLIENT_DATA_HASH: [u8; 32] = [0x42; 32];

fn config() -> Fido2Config {
    Fido2Config::new().with_touch_poll_interval(Duration::from_millis(5))
}

fn registration(rp: &str, user: u8) -> MakeCredentialRequest {
    MakeCredentialRequest::new(
        CLIENT_DATA_HASH,
        RelyingParty {
            id: rp.into(),
            name: Some("Example".into()),
        },
        User {
            id: vec![user],
            name: Some(format!("user-{user}")),
            display_name: None,
        },
    )
}

#[test]
fn test_get_info() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let info = session.get_info().wait().unwrap();
    assert_eq!(info.versions, vec!["FIDO_2_0", "U2F_V2"]);
    assert_eq!(info.aaguid, AAGUID);
    assert_eq!(info.client_pin(), Some(false));
    assert_eq!(info.max_msg_size, Some(1200));
    assert_eq!(device.log.sent_hex().last().unwrap(), "801000000104");
}

#[test]
fn test_key_state_without_touch() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let states = session.subscribe_key_state();
    session.get_info().wait().unwrap();
    assert_eq!(
        states.try_iter().collect::<Vec<_>>(),
        vec![KeyState::ProcessingRequest, KeyState::Idle]
    );
}

#[test]
fn test_key_state_reports_touch() {
    let authenticator = Authenticator::new();
    authenticator.lock().touches = 3;
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let states = session.subscribe_key_state();

    let response = session.make_credential(registration("example.com", 1)).wait().unwrap();
    assert_eq!(response.fmt, "none");
    let attested = response.auth_data.attested_credential.unwrap();
    assert_eq!(attested.aaguid, AAGUID);
    assert_eq!(attested.credential_id.as_ref(), &[1; 16]);

    assert_eq!(session.key_state(), KeyState::Idle);
    assert_eq!(
        states.try_iter().collect::<Vec<_>>(),
        vec![KeyState::ProcessingRequest, KeyState::TouchKey, KeyState::Idle]
    );
    let polls = device.log.sent_hex().iter().filter(|apdu| *apdu == "80110000").count();
    assert_eq!(polls, 3);
}

#[test]
fn test_processing_keep_alive_is_not_a_touch() {
    let authenticator = Authenticator::new();
    authenticator.lock().touches = 2;
    authenticator.lock().poll_status = KEEP_ALIVE_PROCESSING;
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let states = session.subscribe_key_state();

    session.make_credential(registration("example.com", 1)).wait().unwrap();
    assert_eq!(
        states.try_iter().collect::<Vec<_>>(),
        vec![KeyState::ProcessingRequest, KeyState::Idle]
    );
    let polls = device.log.sent_hex().iter().filter(|apdu| *apdu == "80110000").count();
    assert_eq!(polls, 2);
}

#[test]
fn test_touch_timeout() {
    let authenticator = Authenticator::new();
    authenticator.lock().touches = usize::MAX;
    let device = device(authenticator);
    let config = config().with_touch_timeout(Duration::from_millis(150));
    let session = Fido2Session::open(&device.card, config).wait().unwrap();
    let states = session.subscribe_key_state();

    let error = session.make_credential(registration("example.com", 1)).wait().unwrap_err();
    assert!(matches!(error, Fido2Error::Core(ref e) if e.is_timeout()), "{error:?}");
    let settled = states
        .iter()
        .take_while(|state| *state != KeyState::Idle)
        .any(|state| state == KeyState::TouchKey);
    assert!(settled);
}

#[test]
fn test_pin_round_trip() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();

    session.set_pin("1234").wait().unwrap();
    assert_eq!(device.authenticator.lock().pin_hash, Some(ykit_fido2::pin::pin_hash("1234")));
    assert_eq!(session.get_info().wait().unwrap().client_pin(), Some(true));
    assert!(!session.has_pin_token());

    session.verify_pin("1234").wait().unwrap();
    assert!(session.has_pin_token());
    let sent = device.log.sent_hex().join(" ");
    assert!(!sent.contains(&hex::encode("1234")));

    let request = MakeCredentialRequest {
        require_pin: true,
        user_verification: true,
        ..registration("example.com", 1)
    };
    let response = session.make_credential(request).wait().unwrap();
    assert!(device.authenticator.lock().last_pin_auth);
    assert!(response.auth_data.user_verified());

    session.clear_user_verification();
    assert!(!session.has_pin_token());
}

#[test]
fn test_wrong_pin_costs_a_retry() {
    let authenticator = Authenticator::new();
    authenticator.lock().set_pin("1234");
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();

    assert_eq!(session.get_pin_retries().wait().unwrap(), MAX_RETRIES);
    let error = session.verify_pin("9999").wait().unwrap_err();
    assert_eq!(error, Fido2Error::Ctap(CtapStatus::PinInvalid));
    assert!(!session.has_pin_token());
    assert_eq!(session.get_pin_retries().wait().unwrap(), MAX_RETRIES - 1);

    session.verify_pin("1234").wait().unwrap();
    assert_eq!(session.get_pin_retries().wait().unwrap(), MAX_RETRIES);
}

#[test]
fn test_verify_without_pin_set() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    assert_eq!(session.verify_pin("1234").wait(), Err(Fido2Error::Ctap(CtapStatus::PinNotSet)));
}

#[test]
fn test_rejected_before_io() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let sent = device.log.len();

    assert!(matches!(session.verify_pin("12").wait(), Err(Fido2Error::InvalidPin(_))));
    assert!(matches!(session.set_pin(&"9".repeat(64)).wait(), Err(Fido2Error::InvalidPin(_))));
    let request = MakeCredentialRequest {
        require_pin: true,
        ..registration("example.com", 1)
    };
    assert_eq!(session.make_credential(request).wait(), Err(Fido2Error::PinTokenRequired));
    let assertion = GetAssertionRequest {
        require_pin: true,
        ..GetAssertionRequest::new("example.com", CLIENT_DATA_HASH)
    };
    assert_eq!(session.get_assertion(assertion).wait(), Err(Fido2Error::PinTokenRequired));
    assert_eq!(device.log.len(), sent);
}

#[test]
fn test_change_pin() {
    let authenticator = Authenticator::new();
    authenticator.lock().set_pin("1234");
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    session.verify_pin("1234").wait().unwrap();

    session.change_pin("1234", "56789").wait().unwrap();
    assert!(!session.has_pin_token());
    assert_eq!(
        session.verify_pin("1234").wait(),
        Err(Fido2Error::Ctap(CtapStatus::PinInvalid))
    );
    session.verify_pin("56789").wait().unwrap();

    assert_eq!(
        session.change_pin("0000", "1111").wait(),
        Err(Fido2Error::Ctap(CtapStatus::PinInvalid))
    );
}

#[test]
fn test_requests_queued_behind_pin_calls_see_the_token() {
    let authenticator = Authenticator::new();
    authenticator.lock().set_pin("1234");
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    let request = MakeCredentialRequest {
        require_pin: true,
        user_verification: true,
        ..registration("example.com", 1)
    };
    let assertion = GetAssertionRequest {
        require_pin: true,
        ..GetAssertionRequest::new("example.com", CLIENT_DATA_HASH)
    };

    let verified = session.verify_pin("1234");
    let created = session.make_credential(request);
    let changed = session.change_pin("1234", "56789");
    let refused = session.get_assertion(assertion);

    verified.wait().unwrap();
    let response = created.wait().unwrap();
    assert!(response.auth_data.user_verified());
    changed.wait().unwrap();
    assert_eq!(refused.wait(), Err(Fido2Error::PinTokenRequired));
    assert_eq!(device.authenticator.lock().credentials.len(), 1);
}

#[test]
fn test_assertions_across_credentials() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    session.make_credential(registration("example.com", 1)).wait().unwrap();
    session.make_credential(registration("example.com", 2)).wait().unwrap();
    session.make_credential(registration("other.org", 3)).wait().unwrap();

    let first = session
        .get_assertion(GetAssertionRequest::new("example.com", CLIENT_DATA_HASH))
        .wait()
        .unwrap();
    assert_eq!(first.number_of_credentials, Some(2));
    assert_eq!(first.user.as_ref().unwrap().id, vec![1]);
    assert_eq!(first.auth_data.sign_count, 1);
    assert!(first.auth_data.user_present());
    assert!(!first.auth_data.user_verified());

    let second = session.get_next_assertion().wait().unwrap();
    assert_eq!(second.credential.unwrap().id, vec![2; 16]);
    assert_eq!(second.number_of_credentials, None);
    assert_eq!(session.get_next_assertion().wait(), Err(Fido2Error::Ctap(CtapStatus::NotAllowed)));

    let missing = session
        .get_assertion(GetAssertionRequest::new("nowhere.net", CLIENT_DATA_HASH))
        .wait();
    assert_eq!(missing, Err(Fido2Error::Ctap(CtapStatus::NoCredentials)));
}

#[test]
fn test_allow_and_exclude_lists() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    session.make_credential(registration("example.com", 1)).wait().unwrap();
    session.make_credential(registration("example.com", 2)).wait().unwrap();

    let request = GetAssertionRequest {
        allow_list: vec![CredentialDescriptor { id: vec![2; 16] }],
        ..GetAssertionRequest::new("example.com", CLIENT_DATA_HASH)
    };
    let assertion = session.get_assertion(request).wait().unwrap();
    assert_eq!(assertion.user.unwrap().id, vec![2]);
    assert_eq!(assertion.number_of_credentials, None);

    let duplicate = MakeCredentialRequest {
        exclude_list: vec![CredentialDescriptor { id: vec![1; 16] }],
        ..registration("example.com", 3)
    };
    assert_eq!(
        session.make_credential(duplicate).wait().unwrap_err().ctap_status(),
        Some(CtapStatus::CredentialExcluded)
    );
}

#[test]
fn test_reset() {
    let authenticator = Authenticator::new();
    authenticator.lock().set_pin("1234");
    let device = device(authenticator);
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    session.verify_pin("1234").wait().unwrap();
    session.make_credential(registration("example.com", 1)).wait().unwrap();

    session.reset().wait().unwrap();
    assert!(!session.has_pin_token());
    assert_eq!(session.get_info().wait().unwrap().client_pin(), Some(false));
    assert!(device.authenticator.lock().credentials.is_empty());
}

#[test]
fn test_other_selection_invalidates_session() {
    let device = device(Authenticator::new());
    let session = Fido2Session::open(&device.card, config()).wait().unwrap();
    assert!(device.card.select_application(Application::Oath).wait().is_err());
    assert_eq!(session.get_info().wait(), Err(Fido2Error::SessionInvalidated));

    session.select_application().wait().unwrap();
    session.get_info().wait().unwrap();
}
