use crate::*;

use xpbridge_core::wire::INDEX_SENTINEL;
use xpbridge_services::discovery::await_beacon;
use xpbridge_services::{SubscribeError, Subscriber};

/// Beacon to streamed value: discover on a plain socket, connect, subscribe
/// and watch the receiver fill the cache.
#[tokio::test]
async fn test_beacon_to_cached_values() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    sim.set_value("sim/flightmodel/position/latitude", 47.25);
    sim.set_value("sim/flightmodel/position/longitude", 11.5);

    let listener = UdpSocket::bind("127.0.0.1:0").await?;
    let announcer = UdpSocket::bind("127.0.0.1:0").await?;
    announcer.send_to(&sim.beacon(), listener.local_addr()?).await?;
    let beacon = await_beacon(&listener, Duration::from_secs(2)).await?;
    assert_eq!(beacon.hostname, "fake-sim");
    assert_eq!(beacon.addr().port(), sim.addr().port());

    let bridge = Bridge::idle();
    assert!(bridge.link.install(Endpoint::for_beacon(&beacon).await?));

    let sent = bridge
        .channel
        .subscribe_all(
            ["sim/flightmodel/position/latitude", "sim/flightmodel/position/longitude"],
            5,
        )
        .await;
    assert_eq!(sent, 2);

    let store = bridge.store.clone();
    assert!(
        wait_until(Duration::from_secs(4), || {
            store.get("sim/flightmodel/position/latitude") == Some(47.25)
                && store.get("sim/flightmodel/position/longitude") == Some(11.5)
        })
        .await,
        "values never reached the cache"
    );

    let requests = sim.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.frequency == 5));
    assert_ne!(requests[0].index, requests[1].index);
    Ok(())
}

/// Requests before the endpoint exists fail and leave the registry alone.
#[tokio::test]
async fn test_subscribe_before_connect_fails() -> Result<()> {
    let bridge = Bridge::idle();

    let err = bridge
        .channel
        .set_frequency("sim/time/paused", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SubscribeError::NotInitialized));
    assert_eq!(bridge.store.subscribed_count(), 0);

    assert_eq!(bridge.channel.subscribe_all(["a", "b"], 1).await, 0);
    Ok(())
}

/// Unsubscribing reuses the subscribe index; unknown names get the sentinel.
#[tokio::test]
async fn test_unsubscribe_indices() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    let bridge = Bridge::connected(&sim).await?;

    bridge.channel.set_frequency("sim/time/paused", 2).await?;
    let index = bridge.store.index_of("sim/time/paused").context("not registered")?;

    bridge.channel.set_frequency("sim/time/paused", 0).await?;
    bridge.channel.set_frequency("never/subscribed", 0).await?;
    assert_eq!(bridge.store.index_of("sim/time/paused"), None);

    assert!(wait_until(Duration::from_secs(2), || sim.requests().len() == 3).await);
    assert_eq!(
        sim.requests(),
        vec![
            SeenRequest { name: "sim/time/paused".into(), frequency: 2, index },
            SeenRequest { name: "sim/time/paused".into(), frequency: 0, index },
            SeenRequest { name: "never/subscribed".into(), frequency: 0, index: INDEX_SENTINEL },
        ]
    );
    Ok(())
}

/// Unsubscribed datarefs vanish from the cache and late packets for their
/// old indices are dropped.
#[tokio::test]
async fn test_unsubscribe_all_clears_cache() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    sim.set_value("sim/time/paused", 1.0);
    sim.set_value("sim/time/time_accel", 4.0);
    let bridge = Bridge::connected(&sim).await?;

    bridge
        .channel
        .subscribe_all(["sim/time/paused", "sim/time/time_accel"], 1)
        .await;
    let store = bridge.store.clone();
    assert!(wait_until(Duration::from_secs(4), || store.get("sim/time/time_accel") == Some(4.0)).await);
    let stale_index = store.index_of("sim/time/paused").context("not registered")?;

    bridge.channel.unsubscribe_all().await;
    assert_eq!(store.subscribed_count(), 0);
    assert_eq!(store.get("sim/time/paused"), None);
    assert!(wait_until(Duration::from_secs(2), || sim.active().is_empty()).await);

    // a straggler for the released index
    let straggler = UdpSocket::bind("127.0.0.1:0").await?;
    let local = bridge.link.get().context("no endpoint")?.socket.local_addr()?;
    straggler
        .send_to(
            &encode_values(&[ValueRecord::new(stale_index, 1.0)]),
            ("127.0.0.1", local.port()),
        )
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get("sim/time/paused"), None);
    Ok(())
}

/// Tiny negative jitter is stored as zero; real negatives are kept.
#[tokio::test]
async fn test_negative_noise_is_clamped() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    sim.set_value("sim/flightmodel/position/y_agl", -0.0004);
    sim.set_value("sim/flightmodel/position/vh_ind_fpm", -350.0);
    let bridge = Bridge::connected(&sim).await?;

    bridge
        .channel
        .subscribe_all(
            ["sim/flightmodel/position/y_agl", "sim/flightmodel/position/vh_ind_fpm"],
            1,
        )
        .await;

    let store = bridge.store.clone();
    assert!(
        wait_until(Duration::from_secs(4), || {
            store.get("sim/flightmodel/position/vh_ind_fpm") == Some(-350.0)
                && store.get("sim/flightmodel/position/y_agl").is_some()
        })
        .await
    );
    assert_eq!(store.get("sim/flightmodel/position/y_agl"), Some(0.0));
    Ok(())
}

/// Later packets overwrite earlier values.
#[tokio::test]
async fn test_stream_updates_overwrite() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    sim.set_value("sim/flightmodel/position/groundspeed", 10.0);
    let bridge = Bridge::connected(&sim).await?;

    bridge.channel.set_frequency("sim/flightmodel/position/groundspeed", 5).await?;
    let store = bridge.store.clone();
    assert!(wait_until(Duration::from_secs(4), || {
        store.get("sim/flightmodel/position/groundspeed") == Some(10.0)
    })
    .await);

    sim.set_value("sim/flightmodel/position/groundspeed", 62.5);
    sim.stream().await?;
    assert!(wait_until(Duration::from_secs(2), || {
        store.get("sim/flightmodel/position/groundspeed") == Some(62.5)
    })
    .await);
    Ok(())
}
