use bulk_dispatch::config::{DispatcherConfig, SenderConfig};
use bulk_dispatch::error::DeliveryError;
use bulk_dispatch::message::EmailMessage;
use bulk_dispatch::response::{AggregateResponse, ItemResult};
use bulk_dispatch::sender::BatchSender;
use bulk_dispatch::transport::{InMemoryTransport, TransportError};
use bulk_dispatch::DispatcherEvent;
use std::sync::Arc;

fn message(to: &str) -> EmailMessage {
    EmailMessage::new(to, "from@example.com", "Hello").with_plaintext_body("body")
}

#[tokio::test]
async fn test_positional_reconciliation() {
    let transport = InMemoryTransport::with_responder(|items: &[EmailMessage]| {
        let results = items
            .iter()
            .map(|m| {
                if m.to_email.contains('@') {
                    ItemResult::ok()
                        .with_to_email(m.to_email.clone())
                        .with_message_id(format!("id-{}", m.to_email))
                } else {
                    ItemResult::failed(1002).with_to_email(m.to_email.clone())
                }
            })
            .collect();
        Ok(AggregateResponse::from_results(results))
    });
    let (sender, _events) = BatchSender::new(
        transport,
        SenderConfig::default().with_max_send(2),
        DispatcherConfig::default(),
    );

    let ok = sender.push(message("good@example.com"));
    let bad = sender.push(message("not-an-address"));

    let ok = ok.await.unwrap();
    assert_eq!(ok.success_count, 1);
    assert_eq!(ok.failure_count, 0);
    assert_eq!(ok.results[0].message_id.as_deref(), Some("id-good@example.com"));

    match bad.await {
        Err(DeliveryError::Rejected { code, message }) => {
            assert_eq!(code, 1002);
            assert_eq!(message, "Invalid 'To' email address");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    sender.close().await;
    let stats = sender.stats();
    assert_eq!(stats.call_count, 1);
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.failure_stats.get(1002), 1);
}

#[tokio::test]
async fn test_http_failure_reaches_every_item() {
    let transport = Arc::new(InMemoryTransport::with_responder(|_: &[EmailMessage]| {
        Err(TransportError::from_http_status(413))
    }));
    let (sender, mut events) = BatchSender::new(
        Arc::clone(&transport),
        SenderConfig::default(),
        DispatcherConfig::default(),
    );

    let receipts: Vec<_> = (0..5)
        .map(|i| sender.push(message(&format!("u{i}@example.com"))))
        .collect();
    sender.close().await;

    for receipt in receipts {
        let err = receipt.await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Transport("HTTP 413: Too many messages in request".into())
        );
    }
    assert_eq!(sender.stats().failure_count, 5);
    assert_eq!(transport.call_count(), 1);

    let first = events.recv().await.unwrap();
    assert_eq!(first, DispatcherEvent::Error(TransportError::from_http_status(413)));
    assert_eq!(events.recv().await.unwrap(), DispatcherEvent::Close);
}

#[tokio::test]
async fn test_max_send_default_is_twenty() {
    let transport = Arc::new(InMemoryTransport::<EmailMessage>::accept_all());
    let (sender, _events) = BatchSender::new(
        Arc::clone(&transport),
        SenderConfig::default(),
        DispatcherConfig::default(),
    );
    for i in 0..41 {
        sender.push_with(message(&format!("u{i}@example.com")), |_| {});
    }
    sender.close().await;
    assert_eq!(transport.batch_sizes(), vec![20, 20, 1]);
}
