//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - Publisher -> InMemoryBroker -> Dispatcher 端到端场景
//! - 配置驱动的启动流程

#[cfg(test)]
mod contract_tests {
    use contracts::{NackReason, TYPE_HEADER};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_wire_names_are_stable() {
        assert_eq!(TYPE_HEADER, "_type");
        assert_eq!(NackReason::DecodeError.as_str(), "decode-error");
        assert_eq!(NackReason::NoHandler.as_str(), "no-handler");
        assert_eq!(NackReason::HandlerExhausted.as_str(), "handler-exhausted");
        assert_eq!(NackReason::Shutdown.as_str(), "shutdown");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use codec::Codec;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        BrokerSettings, DestinationConfig, DispatcherSettings, EmptyRegistryPolicy,
        HandlerError, NackReason, Payload, TransportError,
    };
    use dispatcher::{create_dispatcher, DispatcherBuilder, DispatcherHandle, Handler};
    use memory_broker::{InMemoryBroker, SettlementRecord};
    use publisher::{PublishError, Publisher};
    use serde::{Deserialize, Serialize};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Email {
        to: String,
        body: String,
    }

    impl Payload for Email {
        const TYPE_ID: &'static str = "email";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sms {
        number: String,
    }

    impl Payload for Sms {
        const TYPE_ID: &'static str = "sms";
    }

    fn email(to: &str, body: &str) -> Email {
        Email {
            to: to.to_string(),
            body: body.to_string(),
        }
    }

    fn email_codec() -> Arc<Codec> {
        let mut codec = Codec::new();
        codec.register_checked(&email("a@example.com", "hi")).unwrap();
        Arc::new(codec)
    }

    fn no_jitter() -> DispatcherSettings {
        DispatcherSettings {
            jitter: 0.0,
            ..Default::default()
        }
    }

    fn mailbox() -> DestinationConfig {
        DestinationConfig::point_to_point("mailbox", EmptyRegistryPolicy::DeadLetter)
    }

    /// Handler that fails its first `failures` attempts
    fn flaky(failures: u32, attempts: Arc<AtomicU32>) -> Handler {
        Handler::sync("flaky", move |_: &Email| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < failures {
                Err(HandlerError::new(format!("attempt {attempt} failed")))
            } else {
                Ok(())
            }
        })
    }

    async fn settle(broker: &InMemoryBroker, count: usize) {
        broker
            .wait_for_settlements(count, Duration::from_secs(60))
            .await
            .unwrap();
    }

    async fn start(builder: DispatcherBuilder<InMemoryBroker>) -> DispatcherHandle {
        builder.build().unwrap().start().await.unwrap()
    }

    /// End-to-end test: Publisher -> InMemoryBroker -> Dispatcher -> Handler
    ///
    /// 验证完整的数据流：
    /// 1. Publisher 编码 Email 并写入 `_type` 头
    /// 2. Dispatcher 解码并交给唯一的 handler
    /// 3. 成功后 Ack，且 handler 只被调用一次
    #[tokio::test]
    async fn test_e2e_mailbox_point_to_point() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .destination(mailbox())
                .handler(
                    "mailbox",
                    Handler::new("receiver", move |email: Arc<Email>| {
                        let sink = Arc::clone(&sink);
                        async move {
                            sink.lock().unwrap().push((*email).clone());
                            Ok(())
                        }
                    }),
                ),
        )
        .await;

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        let receipt = publisher
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();
        assert_eq!(receipt.destination, "mailbox");

        settle(&broker, 1).await;
        let report = handle.shutdown().await;

        assert_eq!(*received.lock().unwrap(), vec![email("a@example.com", "hi")]);
        assert_eq!(broker.settlements(), vec![SettlementRecord::Acked]);
        assert!(broker.dead_letters().is_empty());
        assert_eq!(broker.unsettled(), 0);

        let total = report.total();
        assert_eq!(total.received, 1);
        assert_eq!(total.acked, 1);
        assert_eq!(total.nacked, 0);
        assert!(report.fatal_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_e2e_retries_then_success_acks_once() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let attempts = Arc::new(AtomicU32::new(0));

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .settings(no_jitter())
                .destination(mailbox().with_retries(
                    3,
                    Duration::from_millis(100),
                    Duration::from_secs(1),
                ))
                .handler("mailbox", flaky(3, Arc::clone(&attempts))),
        )
        .await;

        Publisher::new(Arc::clone(&broker), codec)
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();

        settle(&broker, 1).await;
        let report = handle.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(broker.settlements(), vec![SettlementRecord::Acked]);
        assert_eq!(report.total().retries, 3);
        assert_eq!(report.total().nacked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_e2e_exhausted_retries_nack_once() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let attempts = Arc::new(AtomicU32::new(0));

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .settings(no_jitter())
                .destination(mailbox().with_retries(
                    3,
                    Duration::from_millis(100),
                    Duration::from_secs(1),
                ))
                .handler("mailbox", flaky(4, Arc::clone(&attempts))),
        )
        .await;

        Publisher::new(Arc::clone(&broker), codec)
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();

        settle(&broker, 1).await;
        let report = handle.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            broker.settlements(),
            vec![SettlementRecord::Nacked(NackReason::HandlerExhausted)]
        );
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, NackReason::HandlerExhausted);
        assert_eq!(report.total().acked, 0);
        assert_eq!(report.total().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_e2e_broadcast_slow_handler_does_not_block_others() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let started = Instant::now();
        let finished = Arc::new(Mutex::new(Vec::new()));
        let settled_when_flaky_done = Arc::new(AtomicUsize::new(usize::MAX));

        let fast = |name: &'static str| {
            let started = started;
            let finished = Arc::clone(&finished);
            Handler::new(name, move |_: Arc<Email>| {
                let finished = Arc::clone(&finished);
                async move {
                    finished.lock().unwrap().push((name, started.elapsed()));
                    Ok(())
                }
            })
        };

        let slow = {
            let finished = Arc::clone(&finished);
            let attempts = Arc::new(AtomicU32::new(0));
            let broker = Arc::clone(&broker);
            let settled_when_done = Arc::clone(&settled_when_flaky_done);
            Handler::sync("slow", move |_: &Email| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(HandlerError::new("not yet"));
                }
                settled_when_done.store(broker.settlements().len(), Ordering::SeqCst);
                finished.lock().unwrap().push(("slow", started.elapsed()));
                Ok(())
            })
        };

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .settings(no_jitter())
                .destination(
                    DestinationConfig::broadcast("alerts", EmptyRegistryPolicy::DeadLetter)
                        .with_retries(3, Duration::from_secs(1), Duration::from_secs(10)),
                )
                .handler("alerts", fast("first"))
                .handler("alerts", slow)
                .handler("alerts", fast("third")),
        )
        .await;

        Publisher::new(Arc::clone(&broker), codec)
            .publish("alerts", &email("ops@example.com", "disk full"), None)
            .await
            .unwrap();

        settle(&broker, 1).await;
        handle.shutdown().await;

        let finished = finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 3);
        let elapsed = |name: &str| {
            finished
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, d)| *d)
                .unwrap()
        };
        assert!(elapsed("first") < Duration::from_secs(1));
        assert!(elapsed("third") < Duration::from_secs(1));
        assert!(elapsed("slow") >= Duration::from_secs(1));

        // settled only after the slow handler resolved, and only once
        assert_eq!(settled_when_flaky_done.load(Ordering::SeqCst), 0);
        assert_eq!(broker.settlements(), vec![SettlementRecord::Acked]);
    }

    #[tokio::test]
    async fn test_e2e_empty_registry_policies() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .destination(mailbox())
                .destination(DestinationConfig::point_to_point(
                    "audit",
                    EmptyRegistryPolicy::Drop,
                )),
        )
        .await;

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        publisher
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();
        publisher
            .publish("audit", &email("a@example.com", "hi"), None)
            .await
            .unwrap();

        settle(&broker, 2).await;
        let report = handle.shutdown().await;

        let settlements = broker.settlements();
        assert_eq!(settlements.len(), 2);
        assert!(settlements.contains(&SettlementRecord::Nacked(NackReason::NoHandler)));
        assert!(settlements.contains(&SettlementRecord::Acked));

        assert_eq!(report.destination("mailbox").unwrap().metrics.nacked, 1);
        assert_eq!(report.destination("mailbox").unwrap().metrics.acked, 0);
        assert_eq!(report.destination("audit").unwrap().metrics.dropped, 1);
        assert_eq!(broker.dead_letters()[0].reason, NackReason::NoHandler);
    }

    #[tokio::test(start_paused = true)]
    async fn test_e2e_shutdown_mid_retry_nacks_after_deadline() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let attempts = Arc::new(AtomicU32::new(0));

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .settings(no_jitter())
                .destination(mailbox().with_retries(
                    5,
                    Duration::from_secs(10),
                    Duration::from_secs(60),
                ))
                .handler("mailbox", flaky(u32::MAX, Arc::clone(&attempts))),
        )
        .await;

        Publisher::new(Arc::clone(&broker), codec)
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();

        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let begun = Instant::now();
        let report = handle
            .shutdown_with_deadline(Duration::from_millis(500))
            .await;

        assert!(report.forced);
        assert!(begun.elapsed() >= Duration::from_millis(500));
        assert!(begun.elapsed() < Duration::from_secs(10));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            broker.settlements(),
            vec![SettlementRecord::Nacked(NackReason::Shutdown)]
        );
        assert!(report.fatal_errors().is_empty());
    }

    #[tokio::test]
    async fn test_e2e_unregistered_type_is_decode_error() {
        let broker = Arc::new(InMemoryBroker::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut sender_codec = Codec::new();
        sender_codec.register::<Email>().unwrap();
        sender_codec.register::<Sms>().unwrap();

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), email_codec())
                .destination(mailbox())
                .handler("mailbox", flaky(0, Arc::clone(&calls))),
        )
        .await;

        Publisher::new(Arc::clone(&broker), Arc::new(sender_codec))
            .publish(
                "mailbox",
                &Sms {
                    number: "+100".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        settle(&broker, 1).await;
        let report = handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            broker.settlements(),
            vec![SettlementRecord::Nacked(NackReason::DecodeError)]
        );
        assert_eq!(report.total().decode_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_e2e_parallelism_bounds_in_flight() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handler = {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            Handler::new("slow", move |_: Arc<Email>| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .destination(mailbox().with_parallelism(4))
                .handler("mailbox", handler),
        )
        .await;

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        for i in 0..12 {
            publisher
                .publish("mailbox", &email("a@example.com", &format!("#{i}")), None)
                .await
                .unwrap();
        }

        let begun = Instant::now();
        settle(&broker, 12).await;
        let report = handle.shutdown().await;

        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert!(begun.elapsed() < Duration::from_millis(1200));
        assert_eq!(report.total().acked, 12);
    }

    #[tokio::test]
    async fn test_e2e_broker_redelivery_until_dead_letter() {
        let broker = Arc::new(InMemoryBroker::with_settings(BrokerSettings {
            redeliver_on_nack: true,
            max_redeliveries: 2,
        }));
        let codec = email_codec();
        let attempts = Arc::new(AtomicU32::new(0));

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .destination(mailbox().with_retries(0, Duration::ZERO, Duration::ZERO))
                .handler("mailbox", flaky(u32::MAX, Arc::clone(&attempts))),
        )
        .await;

        Publisher::new(Arc::clone(&broker), codec)
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();

        settle(&broker, 3).await;
        let report = handle.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(broker.settlements().len(), 3);
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.redelivery_count, 2);
        assert_eq!(report.total().received, 3);
    }

    #[tokio::test]
    async fn test_e2e_handler_registered_while_running() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();
        let calls = Arc::new(AtomicU32::new(0));

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec)).destination(mailbox()),
        )
        .await;
        let publisher = Publisher::new(Arc::clone(&broker), codec);

        publisher
            .publish("mailbox", &email("a@example.com", "early"), None)
            .await
            .unwrap();
        settle(&broker, 1).await;

        let id = handle
            .registry()
            .register("mailbox", flaky(0, Arc::clone(&calls)), None)
            .unwrap();
        publisher
            .publish("mailbox", &email("a@example.com", "late"), None)
            .await
            .unwrap();
        settle(&broker, 2).await;

        assert!(handle.registry().unregister(id));
        publisher
            .publish("mailbox", &email("a@example.com", "after"), None)
            .await
            .unwrap();
        settle(&broker, 3).await;
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            broker.settlements(),
            vec![
                SettlementRecord::Nacked(NackReason::NoHandler),
                SettlementRecord::Acked,
                SettlementRecord::Nacked(NackReason::NoHandler),
            ]
        );
    }

    #[tokio::test]
    async fn test_e2e_broker_outage_and_closure() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .destination(mailbox())
                .handler("mailbox", flaky(0, Arc::new(AtomicU32::new(0)))),
        )
        .await;
        let publisher = Publisher::new(Arc::clone(&broker), codec);

        broker.set_online(false);
        let err = publisher
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Transport(TransportError::Unavailable { .. })
        ));
        broker.set_online(true);

        broker.close();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.finished_workers().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let report = handle.shutdown().await;
        assert_eq!(report.fatal_errors().len(), 1);
        assert!(report.fatal_errors()[0].is_broker_failure());
        assert_eq!(report.total().settled(), 0);
    }

    #[tokio::test]
    async fn test_e2e_config_driven_startup() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
version = "V1"

[dispatcher]
shutdown_deadline_ms = 1000
jitter = 0.0

[[destinations]]
name = "mailbox"
mode = "point_to_point"
max_retries = 1
backoff_base_ms = 1
backoff_max_ms = 5
empty_registry_policy = "dead_letter"

[[destinations]]
name = "alerts"
mode = "broadcast"
broker_kind = "topic"
empty_registry_policy = "drop"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let broker = Arc::new(InMemoryBroker::from_blueprint(&blueprint));
        let codec = email_codec();
        let calls = Arc::new(AtomicU32::new(0));

        let dispatcher =
            create_dispatcher(&blueprint, Arc::clone(&broker), Arc::clone(&codec)).unwrap();
        dispatcher
            .registry()
            .register("mailbox", flaky(1, Arc::clone(&calls)), None)
            .unwrap();
        let handle = dispatcher.start().await.unwrap();

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        publisher
            .publish("mailbox", &email("a@example.com", "hi"), None)
            .await
            .unwrap();
        publisher
            .publish("alerts", &email("ops@example.com", "ping"), None)
            .await
            .unwrap();

        settle(&broker, 2).await;
        let report = handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.destination("mailbox").unwrap().metrics.acked, 1);
        assert_eq!(report.destination("alerts").unwrap().metrics.dropped, 1);
        assert!(!report.forced);
    }

    #[tokio::test]
    async fn test_e2e_register_on_undeclared_destination_fails() {
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = create_dispatcher(
            &ConfigLoader::default_blueprint(),
            Arc::clone(&broker),
            email_codec(),
        )
        .unwrap();

        let err = dispatcher
            .registry()
            .register("outbox", flaky(0, Arc::new(AtomicU32::new(0))), None)
            .unwrap_err();
        assert!(err.to_string().contains("outbox"));
        assert!(dispatcher.registry().lookup("outbox").is_empty());
    }

    /// 运行摘要：broker 结算记录与 dispatcher 指标汇总为 DeliverySummary
    #[tokio::test]
    async fn test_e2e_settlements_feed_delivery_stats() {
        let broker = Arc::new(InMemoryBroker::new());
        let codec = email_codec();

        let handle = start(
            DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
                .settings(no_jitter())
                .destination(mailbox().with_retries(
                    0,
                    Duration::from_millis(1),
                    Duration::from_millis(1),
                ))
                .handler(
                    "mailbox",
                    Handler::sync("picky", |email: &Email| {
                        if email.body == "bad" {
                            Err(HandlerError::new("rejected"))
                        } else {
                            Ok(())
                        }
                    }),
                ),
        )
        .await;

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        let mut stats = observability::DeliveryStatsAggregator::new();
        for body in ["hi", "bad", "hello"] {
            let result = publisher
                .publish("mailbox", &email("a@example.com", body), None)
                .await;
            stats.record_publish(result.is_ok());
        }

        settle(&broker, 3).await;
        let report = handle.shutdown().await;

        for record in broker.settlements() {
            match record {
                SettlementRecord::Acked => stats.record_ack(),
                SettlementRecord::Nacked(reason) => stats.record_nack(reason),
            }
        }

        let summary = stats.summary();
        assert_eq!(summary.published, 3);
        assert_eq!(summary.settled, 3);
        assert_eq!(summary.acked, report.total().acked);
        assert_eq!(summary.nacked, report.total().nacked);
        assert_eq!(summary.nack_reasons.get("handler-exhausted"), Some(&1));
    }
}
