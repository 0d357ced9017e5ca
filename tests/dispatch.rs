//! End-to-end dispatch over the in-memory transport

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use armlink::{
    float_at, ClientConfig, Command, CommandEnvelope, DebugInstruction, ExecutionLevel, FeedbackLevel, Instruction,
    Interface, LinkError, MemoryTransport, ParseWith, RobotClient, RobotMessage,
};

const NAMESPACE: &str = "/rob1";
const APP_RESPONSE: &str = "/rob1/robot_response";

async fn connect(transport: &Arc<MemoryTransport>) -> RobotClient {
    connect_with(transport, ClientConfig::with_namespace(NAMESPACE)).await
}

async fn connect_with(transport: &Arc<MemoryTransport>, config: ClientConfig) -> RobotClient {
    RobotClient::connect(transport.clone(), &config).await.unwrap()
}

fn feedback_for(sequence_id: u32, feedback: &str, float_values: Vec<f64>) -> RobotMessage {
    RobotMessage {
        instruction: "r_RRC_ReadAnalog".to_string(),
        sequence_id,
        feedback_level: 1,
        exec_level: 0,
        feedback: feedback.to_string(),
        feedback_id: sequence_id,
        string_values: vec![],
        float_values,
    }
}

#[tokio::test]
async fn test_echo_round_trip() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop").with_feedback(FeedbackLevel::Done));
    let future = client.send(&mut command, None).await.unwrap().unwrap();

    assert_eq!(future.result(Some(Duration::from_secs(1))).await.unwrap(), "Done");
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_deferred_result_uses_command_parser() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let envelope = CommandEnvelope::new("r_RRC_ReadAnalog")
        .with_feedback(FeedbackLevel::Done)
        .with_strings(["ai_Pressure"]);
    let mut command = Command::with_parser(envelope, ParseWith::new(|m: &RobotMessage| float_at(m, 0)));

    let future = client.send(&mut command, None).await.unwrap().unwrap();
    let sequence_id = command.envelope().sequence_id();
    assert_eq!(future.key().to_string(), format!("msg:{}", sequence_id));

    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Done", vec![4.25]));
    assert_eq!(future.result(None).await.unwrap(), 4.25);
}

#[tokio::test]
async fn test_send_and_wait_upgrades_to_done() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    assert_eq!(command.envelope().feedback_level, FeedbackLevel::None);

    let result = client
        .send_and_wait(&mut command, Some(Duration::from_secs(1)), None)
        .await
        .unwrap();

    assert_eq!(result, "Done");
    assert_eq!(command.envelope().feedback_level, FeedbackLevel::Done);
    assert_eq!(transport.last_published().unwrap().feedback_level, 1);
}

#[tokio::test]
async fn test_send_and_wait_upgrades_driver_scope_to_data() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::system("get_robot_state"));
    assert_eq!(command.envelope().exec_level, ExecutionLevel::Driver);

    client
        .send_and_wait(&mut command, Some(Duration::from_secs(1)), None)
        .await
        .unwrap();

    assert_eq!(command.envelope().feedback_level, FeedbackLevel::Data);
    let published = transport.published_on("/rob1/robot_command_system");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].feedback_level, -1);
}

#[tokio::test]
async fn test_explicit_feedback_level_is_kept() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop").with_feedback(FeedbackLevel::Data));
    client.send_and_wait(&mut command, None, None).await.unwrap();
    assert_eq!(command.envelope().feedback_level, FeedbackLevel::Data);
}

#[tokio::test]
async fn test_error_marker_surfaces_as_instruction_error() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_MoveToJoints").with_feedback(FeedbackLevel::Done));
    let future = client.send(&mut command, None).await.unwrap().unwrap();
    let sequence_id = command.envelope().sequence_id();

    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Done FError Joint out of range", vec![]));

    match future.result(Some(Duration::from_secs(1))).await {
        Err(LinkError::Instruction { feedback, reply }) => {
            assert_eq!(feedback, "Done FError Joint out of range");
            assert_eq!(reply.feedback_id, sequence_id);
        }
        other => panic!("expected instruction error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_is_bounded_and_late_feedback_is_harmless() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    let started = Instant::now();
    let err = client
        .send_and_wait(&mut command, Some(Duration::from_millis(50)), None)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, LinkError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
    assert_eq!(client.pending(), 0);

    let sequence_id = command.envelope().sequence_id();
    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Done", vec![]));
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_timeout_without_eviction_keeps_entry_until_late_feedback() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let config = ClientConfig::load_from_str("client:\n  namespace: /rob1\nfeedback:\n  evict_on_timeout: false\n")
        .unwrap();
    let client = connect_with(&transport, config).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    let err = client
        .send_and_wait(&mut command, Some(Duration::from_millis(50)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
    assert_eq!(client.pending(), 1);

    let sequence_id = command.envelope().sequence_id();
    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Done", vec![]));
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_abandoned_waiters_leave_the_table() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    for _ in 0..3 {
        let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop").with_feedback(FeedbackLevel::Done));
        let future = client.send(&mut command, None).await.unwrap();
        assert!(future.is_some());
    }
    assert_eq!(client.pending(), 0);

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), client.send_and_wait(&mut command, None, None)).await;
    assert!(cancelled.is_err());
    assert_eq!(client.pending(), 0);

    let sequence_id = command.envelope().sequence_id();
    assert_eq!(sequence_id, 4);
    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Done", vec![]));
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_configured_default_timeout_applies() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let config =
        ClientConfig::load_from_str("client:\n  namespace: /rob1\nfeedback:\n  default_timeout_seconds: 0.05\n")
            .unwrap();
    let client = connect_with(&transport, config).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    let err = client.send_and_wait(&mut command, None, None).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
}

#[tokio::test]
async fn test_unsolicited_feedback_is_dropped() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    assert_eq!(transport.deliver(APP_RESPONSE, feedback_for(777, "Done", vec![])), 1);
    assert_eq!(transport.deliver("/rob1/robot_response_system", feedback_for(3, "Done", vec![])), 1);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_keys_do_not_collide_across_interfaces() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut app = Command::new(CommandEnvelope::new("r_RRC_Noop").with_feedback(FeedbackLevel::Done));
    let mut sys = Command::new(CommandEnvelope::system("stop_task").with_feedback(FeedbackLevel::Done));
    let app_future = client.send(&mut app, None).await.unwrap().unwrap();
    let sys_future = client.send(&mut sys, None).await.unwrap().unwrap();
    assert_eq!(app.envelope().sequence_id(), sys.envelope().sequence_id());

    transport.deliver("/rob1/robot_response_system", feedback_for(1, "sys done", vec![]));
    assert_eq!(client.pending(), 1);
    assert_eq!(sys_future.result(None).await.unwrap(), "sys done");

    transport.deliver(APP_RESPONSE, feedback_for(1, "app done", vec![]));
    assert_eq!(app_future.result(None).await.unwrap(), "app done");
}

#[tokio::test]
async fn test_protocol_gate_runs_once() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;
    assert_eq!(transport.param_lookups(), 0);

    for _ in 0..3 {
        let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
        client.send_and_wait(&mut command, None, None).await.unwrap();
    }

    assert_eq!(transport.param_lookups(), 1);
    assert_eq!(client.gate().observed_version().await, Some(2));
}

#[tokio::test]
async fn test_protocol_mismatch_blocks_dispatch() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 1));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    let err = client.send(&mut command, None).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Server=1"), "{}", message);
    assert!(message.contains("Client=2"), "{}", message);
    assert!(err.is_connection_fatal());
    assert!(transport.published().is_empty());
    assert_eq!(command.envelope().sequence_id(), 0);
}

#[tokio::test]
async fn test_wrong_namespace_suggests_detected_ones() {
    let transport = Arc::new(MemoryTransport::new().with_server("/rob2", 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
    match client.send(&mut command, None).await {
        Err(LinkError::NamespaceNotFound { detected }) => assert_eq!(detected, vec!["/rob2".to_string()]),
        other => panic!("expected namespace error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_subscriber_receives_every_message_in_order() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let mut command = Command::with_parser(
        CommandEnvelope::new("r_RRC_CustomStream").with_feedback(FeedbackLevel::Data),
        ParseWith::new(|m: &RobotMessage| float_at(m, 0)),
    );
    let key = client
        .send_and_subscribe(
            &mut command,
            move |value: armlink::Result<f64>| sink.lock().unwrap().push(value.unwrap()),
            None,
        )
        .await
        .unwrap();

    let sequence_id = command.envelope().sequence_id();
    for value in [1.0, 2.0, 3.0, 4.0] {
        transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Data", vec![value]));
    }

    assert_eq!(*received.lock().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(client.pending(), 1);

    assert!(client.unsubscribe(&key));
    transport.deliver(APP_RESPONSE, feedback_for(sequence_id, "Data", vec![5.0]));
    assert_eq!(received.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_streaming_rejected_on_system_interface() {
    let transport = Arc::new(MemoryTransport::new().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let mut command = Command::new(CommandEnvelope::system("get_robot_state"));
    let err = client.send_and_subscribe(&mut command, |_| {}, None).await.unwrap_err();
    assert!(matches!(err, LinkError::StreamingUnsupported(Interface::Sys)));

    let mut app = Command::new(CommandEnvelope::new("r_RRC_Noop").with_system_name("noop"));
    let err = client
        .send_and_subscribe(&mut app, |_| {}, Some(Interface::Sys))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::StreamingUnsupported(Interface::Sys)));
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_debug_wrapper_returns_raw_feedback() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = connect(&transport).await;

    let envelope = CommandEnvelope::new("r_RRC_PrintText").with_strings(["hello"]);
    let mut command = DebugInstruction::new(Command::new(envelope));
    let reply = client.send_and_wait(&mut command, None, None).await.unwrap();

    assert_eq!(reply.feedback_id, command.sequence_id());
    assert_eq!(reply.string_values, vec!["hello".to_string()]);
    assert_eq!(command.feedback_level(), FeedbackLevel::Done);
    assert_eq!(command.exec_level(), ExecutionLevel::Robot);
}

#[tokio::test]
async fn test_concurrent_senders_get_unique_ids() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let client = Arc::new(connect(&transport).await);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
                    client
                        .send_and_wait(&mut command, Some(Duration::from_secs(1)), None)
                        .await
                        .unwrap();
                    ids.push(command.envelope().sequence_id());
                }
                ids
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.extend(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), 200);
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_rollover_reuses_ids_from_one() {
    let transport = Arc::new(MemoryTransport::with_echo().with_server(NAMESPACE, 2));
    let config =
        ClientConfig::load_from_str("client:\n  namespace: /rob1\nfeedback:\n  rollover_threshold: 2\n").unwrap();
    let client = connect_with(&transport, config).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let mut command = Command::new(CommandEnvelope::new("r_RRC_Noop"));
        client.send_and_wait(&mut command, None, None).await.unwrap();
        ids.push(command.envelope().sequence_id());
    }
    assert_eq!(ids, vec![1, 2, 1]);
}
