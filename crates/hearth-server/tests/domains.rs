//! End-to-end domain and envelope-key scenarios.

mod common;

use common::TestServer;

use hearth_device::error::DeviceError;
use hearth_shared::envelope::unwrap_key;
use hearth_shared::types::{DeviceAddr, ResultCode, UserId};

fn wrapped_member_key(server: &TestServer, domain: &str, user: &str) -> Vec<u8> {
    let (_, domains) = server.state.snapshot();
    domains
        .iter()
        .find(|d| d.name == domain)
        .and_then(|d| d.wrapped_key_for(&UserId::from(user)))
        .expect("member entry present")
        .to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn membership_keys_wrap_one_domain_key() {
    let server = TestServer::new();

    // bob and carol must exist before they can be added
    let (bob, bob_handle) = server.login("bob", "sensor1").await.unwrap();
    let (carol, carol_handle) = server.login("carol", "cam1").await.unwrap();
    let (mut alice, _alice_handle) = server.login("alice", "phone1").await.unwrap();

    alice.create_domain("home").await.unwrap();
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();

    let bob_first = wrapped_member_key(&server, "home", "bob");
    assert!(!bob_first.is_empty());

    alice
        .add_user(&UserId::from("carol"), "home", "secret123")
        .await
        .unwrap();
    let carol_key = wrapped_member_key(&server, "home", "carol");
    assert_ne!(bob_first, carol_key, "wrapped bytes are per-recipient");

    // repeat ADD for bob with the same password: recorded salt/iterations
    // must derive the identical underlying key
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();
    let bob_second = wrapped_member_key(&server, "home", "bob");

    let bob_identity = server.identity_for("bob");
    let first = unwrap_key(bob_identity.exchange_secret(), &bob_first).unwrap();
    let second = unwrap_key(bob_identity.exchange_secret(), &bob_second).unwrap();
    assert_eq!(first, second, "same password must rebuild the same domain key");

    // and carol's wrapped copy unwraps to that same key with her secret
    let carol_identity = server.identity_for("carol");
    let carols = unwrap_key(carol_identity.exchange_secret(), &carol_key).unwrap();
    assert_eq!(first, carols);

    bob.bye().await.unwrap();
    carol.bye().await.unwrap();
    bob_handle.await.unwrap();
    carol_handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn temperature_roundtrip_preserves_bits() {
    let server = TestServer::new();

    let (mut bob, _bob_handle) = server.login("bob", "sensor1").await.unwrap();
    let (mut alice, _alice_handle) = server.login("alice", "phone1").await.unwrap();

    alice.create_domain("home").await.unwrap();
    // the owner needs an explicit member entry to read data
    alice
        .add_user(&UserId::from("alice"), "home", "secret123")
        .await
        .unwrap();
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();

    bob.register_device("home").await.unwrap();
    bob.push_temperature(21.5).await.unwrap();

    let readings = alice.get_temperatures("home").await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].0, "bob:sensor1");
    assert_eq!(readings[0].1.to_bits(), 21.5f32.to_bits());

    // latest value wins, no history
    bob.push_temperature(-7.25).await.unwrap();
    let readings = alice.get_temperatures("home").await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].1.to_bits(), (-7.25f32).to_bits());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn image_roundtrip_through_shared_domain() {
    let server = TestServer::new();

    let (mut bob, _bob_handle) = server.login("bob", "cam1").await.unwrap();
    let (mut alice, _alice_handle) = server.login("alice", "phone1").await.unwrap();

    alice.create_domain("home").await.unwrap();
    alice
        .add_user(&UserId::from("alice"), "home", "secret123")
        .await
        .unwrap();
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();
    bob.register_device("home").await.unwrap();

    // no image submitted yet
    let err = alice.get_image("bob", "cam1").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoData)));

    let image = vec![0x89u8, 0x50, 0x4E, 0x47, 1, 2, 3, 4, 5];
    bob.push_image(&image).await.unwrap();

    let retrieved = alice.get_image("bob", "cam1").await.unwrap();
    assert_eq!(retrieved, image);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn my_domains_lists_registered_pairs() {
    let server = TestServer::new();

    let (mut bob, _bob_handle) = server.login("bob", "sensor1").await.unwrap();
    let (mut alice, _alice_handle) = server.login("alice", "phone1").await.unwrap();

    // nothing registered yet
    let err = bob.my_domains().await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoData)));

    alice.create_domain("home").await.unwrap();
    alice.create_domain("barn").await.unwrap();
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();
    alice
        .add_user(&UserId::from("bob"), "barn", "hunter2")
        .await
        .unwrap();
    bob.register_device("home").await.unwrap();
    bob.register_device("barn").await.unwrap();

    let entries = bob.my_domains().await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.domain.as_str()).collect();
    assert_eq!(names, vec!["barn", "home"]);
    assert!(entries.iter().all(|e| !e.wrapped_key.is_empty()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_error_codes() {
    let server = TestServer::new();

    let (mut bob, _bob_handle) = server.login("bob", "sensor1").await.unwrap();
    let (mut alice, _alice_handle) = server.login("alice", "phone1").await.unwrap();

    alice.create_domain("home").await.unwrap();

    // duplicate create
    let err = alice.create_domain("home").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::Nok)));

    // missing domain
    let err = alice
        .add_user(&UserId::from("bob"), "barn", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoDomain)));
    let err = alice.get_temperatures("barn").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoDomain)));

    // unknown target user
    let err = alice
        .add_user(&UserId::from("dave"), "home", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoUser)));

    // non-owner cannot add members
    let err = bob
        .add_user(&UserId::from("bob"), "home", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoPerm)));

    // registering a device requires membership
    let err = bob.register_device("home").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoPerm)));

    // image of a device registered nowhere
    let err = alice.get_image("bob", "sensor1").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoId)));

    // member with no submitted data
    alice
        .add_user(&UserId::from("alice"), "home", "secret123")
        .await
        .unwrap();
    let err = alice.get_temperatures("home").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoData)));

    // non-member cannot read even when data exists
    alice
        .add_user(&UserId::from("bob"), "home", "secret123")
        .await
        .unwrap();
    bob.register_device("home").await.unwrap();
    bob.push_temperature(3.0).await.unwrap();
    let (mut carol, _carol_handle) = server.login("carol", "cam1").await.unwrap();
    let err = carol.get_temperatures("home").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoPerm)));

    // and cannot fetch the image of a device it shares no domain with
    bob.push_image(&[1, 2, 3]).await.unwrap();
    let err = carol.get_image("bob", "sensor1").await.unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoPerm)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn certificate_fetch_for_unknown_user() {
    let server = TestServer::new();
    let (mut alice, _handle) = server.login("alice", "phone1").await.unwrap();

    alice.create_domain("home").await.unwrap();
    // AddUser fetches the certificate first and surfaces NO_USER
    let err = alice
        .add_user(&UserId::from("nobody"), "home", "pw")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::Rejected(ResultCode::NoUser)));
}
