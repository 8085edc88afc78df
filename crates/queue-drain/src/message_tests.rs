//! Tests for message types and identifiers.

use super::*;

mod queue_name {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(QueueName::new("orders".to_string()).is_ok());
        assert!(QueueName::new("orders-dlq_2".to_string()).is_ok());
        assert!(QueueName::new("events.fifo".to_string()).is_ok());
        assert!(QueueName::new("a".repeat(80)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(QueueName::new(String::new()).is_err());
        assert!(QueueName::new("a".repeat(81)).is_err());
        assert!(QueueName::new("with space".to_string()).is_err());
        assert!(QueueName::new("dot.inside".to_string()).is_err());
        assert!(QueueName::new(".fifo".to_string()).is_err());
    }

    #[test]
    fn test_fifo_detection() {
        let fifo: QueueName = "events.fifo".parse().unwrap();
        let standard: QueueName = "events".parse().unwrap();

        assert!(fifo.is_fifo());
        assert!(!standard.is_fifo());
    }

    #[test]
    fn test_deserialization_validates() {
        let ok: Result<QueueName, _> = serde_json::from_str("\"orders\"");
        assert_eq!(ok.unwrap().as_str(), "orders");

        let bad: Result<QueueName, _> = serde_json::from_str("\"bad name\"");
        assert!(bad.is_err());
    }
}

#[test]
fn test_queue_handle_accessors() {
    let name = QueueName::new("orders".to_string()).unwrap();
    let handle = QueueHandle::new(name.clone(), "https://sqs.example/123/orders");

    assert_eq!(handle.name(), &name);
    assert_eq!(handle.url(), "https://sqs.example/123/orders");
    assert_eq!(
        handle.to_string(),
        "orders (https://sqs.example/123/orders)"
    );
}

#[test]
fn test_message_id_parsing() {
    assert!("".parse::<MessageId>().is_err());
    assert_eq!("abc".parse::<MessageId>().unwrap().as_str(), "abc");
    assert_ne!(MessageId::new(), MessageId::new());
}

#[test]
fn test_receive_options_builder() {
    let options = ReceiveOptions::new()
        .with_max_messages(10)
        .with_wait_time(Duration::from_secs(20));

    assert_eq!(options.max_messages, 10);
    assert_eq!(options.wait_time, Duration::from_secs(20));
    assert_eq!(ReceiveOptions::default().max_messages, 1);
}
