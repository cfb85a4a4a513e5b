use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use eletto::{
    Bus, ConfigBuilder, Elector, ElectorConfig, ElectorError, Engine, Message, MessageKind, Role,
    Token,
};
use futures_util::future::join_all;
use tokio::time::{sleep, timeout};

fn quick() -> ElectorConfig {
    ConfigBuilder::new()
        .apply_window(Duration::from_millis(300))
        .retry_interval(Duration::from_millis(300))
        .build()
}

pub async fn test_single_elects_itself<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let elector = Elector::new(bus.clone(), channel, quick()).await?;

    assert_eq!(elector.channel(), channel);
    assert_eq!(elector.role(), Role::Idle);
    assert!(elector.apply_once().await?);
    assert!(elector.is_leader());
    assert_eq!(elector.role(), Role::Leader);

    // Re-applying as the leader short-circuits.
    assert!(elector.apply_once().await?);

    Ok(())
}

pub async fn test_defers_to_sitting_leader<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let a = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(a.apply_once().await?);

    let b = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(!b.apply_once().await?);

    assert!(a.is_leader());
    assert!(!b.is_leader());
    assert_eq!(b.role(), Role::Idle);

    Ok(())
}

pub async fn test_two_way_race<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    for round in 0..3 {
        let channel = format!("{channel}_{round}");

        let a = Elector::new(bus.clone(), &channel, quick()).await?;
        let b = Elector::new(bus.clone(), &channel, quick()).await?;

        let (won_a, won_b) = tokio::join!(a.apply_once(), b.apply_once());
        let (won_a, won_b) = (won_a?, won_b?);

        assert!(won_a ^ won_b, "exactly one of two rivals may win");

        let (winner, loser) = if won_a { (&a, &b) } else { (&b, &a) };
        assert!(winner.token() > loser.token());
        assert!(winner.is_leader());
        assert!(!loser.is_leader());
    }

    Ok(())
}

pub async fn test_ten_way_race<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let mut electors = Vec::new();
    for _ in 0..10 {
        electors.push(Elector::new(bus.clone(), channel, quick()).await?);
    }

    let mut winners = 0;
    for outcome in join_all(electors.iter().map(|e| e.apply_once())).await {
        if outcome? {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(electors.iter().filter(|e| e.is_leader()).count(), 1);

    let leader = electors.iter().find(|e| e.is_leader()).unwrap();
    let greatest = electors.iter().map(|e| e.token()).max().unwrap();
    assert_eq!(leader.token(), greatest);

    Ok(())
}

pub async fn test_leader_answers_applicants<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let a = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(a.apply_once().await?);

    let mut observer = bus.subscribe(channel, Token::new()).await?;

    let b = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(!b.apply_once().await?);

    let mut seen = Vec::new();
    while let Ok(Some(message)) = timeout(Duration::from_millis(500), observer.recv()).await {
        seen.push((message.kind, message.token));
    }

    assert!(seen.contains(&(MessageKind::Apply, b.token())));
    assert!(seen.contains(&(MessageKind::Tell, a.token())));

    Ok(())
}

pub async fn test_candidacy_reannounces_midwindow<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let config = ConfigBuilder::new()
        .apply_window(Duration::from_millis(600))
        .retry_interval(Duration::from_millis(300))
        .build();

    let elector = Elector::new(bus.clone(), channel, config).await?;
    let mut observer = bus.subscribe(channel, Token::new()).await?;

    assert!(elector.apply_once().await?);

    let mut kinds = Vec::new();
    while let Ok(Some(message)) = timeout(Duration::from_millis(500), observer.recv()).await {
        if message.token == elector.token() {
            kinds.push(message.kind);
        }
    }

    // One announce when the window opens, a second halfway through for
    // peers that missed the first, then the promotion claim.
    assert_eq!(
        kinds,
        [MessageKind::Apply, MessageKind::Apply, MessageKind::Tell]
    );

    Ok(())
}

pub async fn test_leader_keeps_seat_on_foreign_tell<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let elector = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(elector.apply_once().await?);

    bus.publish(channel, Message::tell(Token::new())).await?;
    sleep(Duration::from_millis(300)).await;

    // A conflicting claim is logged, not obeyed.
    assert!(elector.is_leader());

    // And the seat is still defended.
    let rival = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(!rival.apply_once().await?);
    assert!(elector.is_leader());

    Ok(())
}

pub async fn test_step_down_triggers_fast_reelection<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let slow_retry = ConfigBuilder::new()
        .apply_window(Duration::from_millis(300))
        .retry_interval(Duration::from_secs(60))
        .build();

    let a = Elector::new(bus.clone(), channel, slow_retry.clone()).await?;
    assert!(a.apply_once().await?);

    let b = Elector::new(bus.clone(), channel, slow_retry).await?;
    let waiter = {
        let b = b.clone();
        tokio::spawn(async move { b.wait_for_leadership().await })
    };

    // Let b's first candidacy fail against the sitting leader.
    sleep(Duration::from_millis(600)).await;
    assert!(!b.is_leader());

    a.step_down().await?;

    // With a 60s retry interval, only the departure broadcast can have
    // woken the waiter this fast.
    timeout(Duration::from_secs(5), waiter).await??;
    assert!(b.is_leader());
    assert!(!a.is_leader());

    Ok(())
}

pub async fn test_abrupt_close_is_local_only<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let a = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(a.apply_once().await?);

    let b = Elector::new(bus.clone(), channel, quick()).await?;
    let mut observer = bus.subscribe(channel, Token::new()).await?;

    a.close().await?;
    assert!(!a.is_leader());

    // Nothing went out on the wire.
    match timeout(Duration::from_millis(300), observer.recv()).await {
        Err(_) => {}
        Ok(Some(message)) => bail!("unexpected {} broadcast during close", message.kind),
        Ok(None) => bail!("observer subscription dropped"),
    }
    assert!(!b.is_leader());

    // Peers recover by applying again, not by being told.
    assert!(b.apply_once().await?);
    assert!(b.is_leader());

    Ok(())
}

pub async fn test_reelection_elects_fresh_leader<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let mut electors = Vec::new();
    for _ in 0..6 {
        electors.push(Elector::new(bus.clone(), channel, quick()).await?);
    }

    for outcome in join_all(electors.iter().map(|e| e.apply_once())).await {
        outcome?;
    }

    let first = electors
        .iter()
        .position(|e| e.is_leader())
        .expect("one of six candidates must have won");
    let old_token = electors[first].token();

    let leader = electors.remove(first);
    leader.step_down().await?;
    leader.close().await?;

    for outcome in join_all(electors.iter().map(|e| e.apply_once())).await {
        outcome?;
    }

    let survivors: Vec<_> = electors.iter().filter(|e| e.is_leader()).collect();
    assert_eq!(survivors.len(), 1);
    assert_ne!(survivors[0].token(), old_token);

    Ok(())
}

pub async fn test_concurrent_candidacies_are_rejected<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let config = ConfigBuilder::new()
        .apply_window(Duration::from_secs(2))
        .retry_interval(Duration::from_millis(300))
        .build();

    let elector = Elector::new(bus.clone(), channel, config).await?;

    let first = {
        let elector = elector.clone();
        tokio::spawn(async move { elector.apply_once().await })
    };

    sleep(Duration::from_millis(200)).await;

    match elector.apply_once().await {
        Err(ElectorError::AttemptInFlight) => {}
        other => bail!("expected AttemptInFlight, got {other:?}"),
    }

    // The original candidacy is unaffected and wins on silence.
    assert!(first.await??);

    Ok(())
}

pub async fn test_single_instance_grants_instantly<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let config = ConfigBuilder::new().single_instance(true).build();
    let elector = Elector::new(bus.clone(), channel, config).await?;

    // The sole instance leads from the moment it exists.
    assert!(elector.is_leader());

    let mut observer = bus.subscribe(channel, Token::new()).await?;

    assert!(elector.apply_once().await?);
    assert!(elector.is_leader());

    elector.step_down().await?;
    assert!(!elector.is_leader());

    timeout(Duration::from_millis(500), elector.wait_for_leadership()).await?;
    assert!(elector.is_leader());

    // The bus never heard from it.
    assert!(timeout(Duration::from_millis(300), observer.recv())
        .await
        .is_err());

    Ok(())
}

pub async fn test_closed_elector_refuses_everything<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let elector = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(elector.apply_once().await?);

    elector.close().await?;
    elector.close().await?;

    assert!(elector.is_closed());
    assert!(!elector.is_leader());

    assert!(matches!(
        elector.apply_once().await,
        Err(ElectorError::Closed)
    ));
    assert!(matches!(
        elector.step_down().await,
        Err(ElectorError::Closed)
    ));
    assert!(matches!(elector.become_leader(), Err(ElectorError::Closed)));

    // A waiter on a closed elector parks forever instead of failing.
    let mut waiter = {
        let elector = elector.clone();
        tokio::spawn(async move { elector.wait_for_leadership().await })
    };

    assert!(timeout(Duration::from_millis(500), &mut waiter)
        .await
        .is_err());
    waiter.abort();

    Ok(())
}

pub async fn test_become_leader_is_silent<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let elector = Elector::new(bus.clone(), channel, quick()).await?;
    let mut observer = bus.subscribe(channel, Token::new()).await?;

    elector.become_leader()?;
    assert!(elector.is_leader());

    assert!(timeout(Duration::from_millis(300), observer.recv())
        .await
        .is_err());

    // The silent takeover still defends its seat afterwards.
    let rival = Elector::new(bus.clone(), channel, quick()).await?;
    assert!(!rival.apply_once().await?);

    Ok(())
}

pub async fn test_candidate_ignores_lesser_applicants<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let config = ConfigBuilder::new()
        .apply_window(Duration::from_millis(600))
        .retry_interval(Duration::from_millis(300))
        .build();

    let elector = Elector::new(bus.clone(), channel, config).await?;

    let lesser = loop {
        let token = Token::new();
        if token < elector.token() {
            break token;
        }
    };

    let candidacy = {
        let elector = elector.clone();
        tokio::spawn(async move { elector.apply_once().await })
    };

    // Neither a lesser applicant nor a departure ends the window.
    sleep(Duration::from_millis(150)).await;
    bus.publish(channel, Message::apply(lesser)).await?;
    bus.publish(channel, Message::depart(lesser)).await?;

    assert!(candidacy.await??);
    assert!(elector.is_leader());

    Ok(())
}

pub async fn test_candidate_defers_to_greater_applicant<E: Engine>(
    bus: &Bus<E>,
    channel: &str,
) -> Result<()> {
    let config = ConfigBuilder::new()
        .apply_window(Duration::from_millis(600))
        .retry_interval(Duration::from_millis(300))
        .build();

    let elector = Elector::new(bus.clone(), channel, config).await?;

    let greater = loop {
        let token = Token::new();
        if token > elector.token() {
            break token;
        }
    };

    let candidacy = {
        let elector = elector.clone();
        tokio::spawn(async move { elector.apply_once().await })
    };

    sleep(Duration::from_millis(150)).await;
    bus.publish(channel, Message::apply(greater)).await?;

    assert!(!candidacy.await??);
    assert_eq!(elector.role(), Role::Idle);

    Ok(())
}

pub async fn test_waiters_advance_one_by_one<E: Engine>(bus: &Bus<E>, channel: &str) -> Result<()> {
    let config = ConfigBuilder::new()
        .apply_window(Duration::from_millis(150))
        .retry_interval(Duration::from_millis(200))
        .build();

    let mut electors = Vec::new();
    for _ in 0..5 {
        electors.push(Elector::new(bus.clone(), channel, config.clone()).await?);
    }

    let elected = Arc::new(AtomicUsize::new(0));

    for elector in &electors {
        let elector = elector.clone();
        let elected = elected.clone();

        tokio::spawn(async move {
            elector.wait_for_leadership().await;
            elected.fetch_add(1, Ordering::SeqCst);
        });
    }

    sleep(Duration::from_millis(900)).await;
    assert_eq!(elected.load(Ordering::SeqCst), 1);

    let first = electors
        .iter()
        .position(|e| e.is_leader())
        .expect("a waiter must have been elected");

    let leader = electors.remove(first);
    leader.step_down().await?;
    leader.close().await?;

    sleep(Duration::from_millis(900)).await;
    assert_eq!(elected.load(Ordering::SeqCst), 2);
    assert_eq!(electors.iter().filter(|e| e.is_leader()).count(), 1);

    Ok(())
}
