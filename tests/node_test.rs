mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use channel_orion::error::SessionError;
use channel_orion::groups::GroupSpec;
use channel_orion::node::{
    GroupIds, MediaNode, RxNode, Transmitter, TxMessage, TxNode, TxStatus, lookup, set_user_status, user_status,
};
use channel_orion::{ChannelSink, Supervisor, SupervisorState};
use common::*;
use httpmock::prelude::*;
use orion_client::media::{LyreRequest, MediaServices, Outgoing, SendOptions};
use orion_client::{Endpoints, OrionError, Session};
use serde_json::{Value, json};

/// Delivers every transmission as a `ptt` event on the newest RX connection.
struct Loopback {
    transport: Arc<FakeTransport>,
}

#[async_trait]
impl Transmitter for Loopback {
    async fn transmit(&self, request: &LyreRequest) -> Result<Value, OrionError> {
        self.transport.push_latest(json!({
            "event_type": "ptt",
            "sender": "u-tx",
            "group_id": request.group_ids.first(),
            "media": "https://media/tts.ov",
        }));
        Ok(json!({"status": "queued"}))
    }

    async fn send(
        &self,
        _session: &Session,
        group_id: &str,
        _outgoing: &Outgoing,
        _options: &SendOptions,
    ) -> Result<String, OrionError> {
        let media = format!("https://media/{group_id}.ov");
        self.transport.push_latest(json!({
            "event_type": "ptt",
            "sender": "u-tx",
            "group_id": group_id,
            "media": media,
        }));
        Ok(media)
    }

    async fn upload(&self, _session: &Session, _data: Vec<u8>) -> Result<String, OrionError> {
        Ok("https://media/upload".into())
    }
}

#[tokio::test]
async fn test_tx_message_reaches_rx_on_same_group() {
    let api = FakeApi::new();
    let transport = FakeTransport::new(api.log.clone());
    let (sink, mut rx) = ChannelSink::new();
    let node = RxNode::start_with(Supervisor::new(
        config("g1"),
        credentials(),
        api.clone(),
        transport.clone(),
        Arc::new(sink),
    ));
    let mut states = node.subscribe();
    tokio::time::timeout(Duration::from_secs(3), states.wait_for(|s| *s == SupervisorState::Connected))
        .await
        .expect("rx connected")
        .expect("supervisor alive");

    let tx = TxNode::with_parts(
        api.clone(),
        Arc::new(Loopback { transport: transport.clone() }),
        credentials(),
        GroupSpec::parse("g1"),
    );
    tx.transmit(&TxMessage::text("unit_test")).await.expect("transmit");

    let received = tokio::time::timeout(Duration::from_secs(3), rx.outputs.recv())
        .await
        .expect("event within bounded time")
        .expect("outputs open");
    let ptt = received.ptt.expect("ptt output");
    assert_eq!(ptt["event_type"], "ptt");
    assert_eq!(ptt["group_id"], "g1");

    node.close().await;
}

#[tokio::test]
async fn test_tx_group_ids_from_message_or_config() {
    let api = FakeApi::new();
    let recorder = Arc::new(RecordingTransmitter::default());
    let tx = TxNode::with_parts(api.clone(), recorder.clone(), credentials(), GroupSpec::parse("g1,\r\ng2"));
    let mut status = tx.subscribe();

    tx.transmit(&TxMessage::text("hello")).await.unwrap();
    let from_string: TxMessage = serde_json::from_value(json!({"group_ids": "g7,g8", "message": "hi"})).unwrap();
    tx.transmit(&from_string).await.unwrap();
    let from_list: TxMessage =
        serde_json::from_value(json!({"group_ids": ["g9"], "media": "m", "target": "bob"})).unwrap();
    tx.transmit(&from_list).await.unwrap();

    let sent = recorder.sent.lock().unwrap().clone();
    assert_eq!(sent[0].group_ids, vec!["g1", "g2"]);
    assert_eq!(sent[0].message.as_deref(), Some("hello"));
    assert_eq!(sent[1].group_ids, vec!["g7", "g8"]);
    assert_eq!(sent[2].group_ids, vec!["g9"]);
    assert_eq!(sent[2].target.as_deref(), Some("bob"));
    assert_eq!(sent[2].media.as_deref(), Some("m"));

    assert_eq!(*status.borrow_and_update(), TxStatus::Idle);
    assert_eq!(api.count(|c| *c == Call::Login), 3);
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 3);
}

#[tokio::test]
async fn test_tx_all_resolves_membership() {
    let api = FakeApi::new();
    api.set_groups(&["ga", "gb"]);
    let recorder = Arc::new(RecordingTransmitter::default());
    let tx = TxNode::with_parts(api.clone(), recorder.clone(), credentials(), GroupSpec::All);

    tx.transmit(&TxMessage::text("to everyone")).await.unwrap();

    assert_eq!(recorder.sent.lock().unwrap()[0].group_ids, vec!["ga", "gb"]);
}

#[tokio::test]
async fn test_tx_auth_failure() {
    let api = FakeApi::new();
    api.login_failures.store(1, std::sync::atomic::Ordering::SeqCst);
    let tx = TxNode::with_parts(
        api.clone(),
        Arc::new(RecordingTransmitter::default()),
        credentials(),
        GroupSpec::parse("g1"),
    );
    let err = tx.transmit(&TxMessage::text("x")).await.unwrap_err();
    assert!(matches!(err, SessionError::Auth(OrionError::Network(_))));
    assert_eq!(*tx.subscribe().borrow(), TxStatus::Idle);
}

#[tokio::test]
async fn test_send_announces_to_each_group() {
    let api = FakeApi::new();
    let recorder = Arc::new(RecordingTransmitter::default());
    let tx = TxNode::with_parts(api.clone(), recorder.clone(), credentials(), GroupSpec::parse("g1,g2"));
    let options = SendOptions { target: Some("bob".into()), stream_key: None };

    let urls = tx.send(&Outgoing::Ptt(b"OggS".to_vec()), &options, None).await.unwrap();
    assert_eq!(urls, vec!["https://media.test/g1/1", "https://media.test/g2/2"]);

    let text = Outgoing::Text("hi".into());
    let only = GroupIds::One("g5".into());
    tx.send(&text, &SendOptions::default(), Some(&only)).await.unwrap();

    let announced = recorder.announced.lock().unwrap().clone();
    assert_eq!(announced.len(), 3);
    assert_eq!(announced[0].0, "g1");
    assert_eq!(announced[1].2.target.as_deref(), Some("bob"));
    assert_eq!(announced[2], ("g5".to_string(), text, SendOptions::default()));
    assert_eq!(api.count(|c| *c == Call::Login), 2);
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 2);
    assert_eq!(*tx.subscribe().borrow(), TxStatus::Idle);
}

#[tokio::test]
async fn test_send_refusal_stops_and_still_logs_out() {
    let api = FakeApi::new();
    let recorder = Arc::new(RecordingTransmitter::default());
    recorder.refuse.lock().unwrap().push("g2".into());
    let tx = TxNode::with_parts(api.clone(), recorder.clone(), credentials(), GroupSpec::parse("g1,g2,g3"));

    let err = tx
        .send(&Outgoing::Text("x".into()), &SendOptions::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Transmit(OrionError::Status { status: 403, .. })));
    let groups: Vec<String> = recorder.announced.lock().unwrap().iter().map(|a| a.0.clone()).collect();
    assert_eq!(groups, vec!["g1"]);
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 1);
}

#[tokio::test]
async fn test_upload_returns_media_url() {
    let api = FakeApi::new();
    let recorder = Arc::new(RecordingTransmitter::default());
    let tx = TxNode::with_parts(api.clone(), recorder.clone(), credentials(), GroupSpec::parse("g1"));

    let url = tx.upload(vec![7, 7]).await.unwrap();
    assert_eq!(url, "https://media.test/upload/1");
    assert_eq!(*recorder.uploads.lock().unwrap(), vec![vec![7u8, 7]]);
    assert!(recorder.announced.lock().unwrap().is_empty());
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 1);
}

#[tokio::test]
async fn test_user_status_read_and_update() {
    let api = FakeApi::new();
    let creds = credentials();

    let status = user_status(api.as_ref(), &creds, "bob").await.unwrap();
    assert_eq!(status, json!({"id": "bob", "status": "available"}));

    let away = json!({"status": "away"});
    set_user_status(api.as_ref(), &creds, &away).await.unwrap();
    assert_eq!(api.count(|c| *c == Call::StatusUpdate(away.clone())), 1);
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 2);

    api.login_failures.store(1, std::sync::atomic::Ordering::SeqCst);
    let err = user_status(api.as_ref(), &creds, "bob").await.unwrap_err();
    assert!(matches!(err, SessionError::Auth(_)));
}

#[tokio::test]
async fn test_lookup_user_then_group() {
    let api = FakeApi::new();
    let creds = credentials();

    let user = lookup(api.as_ref(), &creds, USER_ID).await.unwrap();
    assert_eq!(user["name"], "Self");
    let group = lookup(api.as_ref(), &creds, "g42").await.unwrap();
    assert_eq!(group["id"], "g42");
    let missing = lookup(api.as_ref(), &creds, "nobody").await.unwrap_err();
    assert!(matches!(missing, SessionError::Resolution(_)));
    assert_eq!(api.count(|c| matches!(c, Call::Logout(_))), 3);
}

#[tokio::test]
async fn test_media_encode_decode_round_trip() {
    let server = MockServer::start_async().await;
    let wav: Vec<u8> = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
    let wav_json = json!(wav);
    let encode = server
        .mock_async(|when, then| {
            when.method(POST).path("/wav2ov").json_body_partial(json!({"payload": wav_json}).to_string());
            then.status(200).json_body(json!({"media": "https://media/clip.ov"}));
        })
        .await;
    let decode = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/ov2wav")
                .json_body_partial(r#"{"media":"https://media/clip.ov","return_type":"buffer"}"#);
            then.status(200).json_body(json!({"payload": {"type": "Buffer", "data": wav}}));
        })
        .await;
    let node = MediaNode::new(MediaServices::new(Endpoints::single_host(&server.base_url())));

    let encoded = node.encode(json!({"payload": wav})).await.unwrap();
    let media = encoded.message["media"].as_str().unwrap().to_string();
    let decoded = node
        .decode(json!({"event_type": "ptt", "media": media}), Some("buffer"))
        .await
        .unwrap();

    encode.assert_async().await;
    decode.assert_async().await;
    assert_eq!(decoded.payload, Some(wav));
}

#[tokio::test]
async fn test_media_passthrough_without_required_fields() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({}));
        })
        .await;
    let node = MediaNode::new(MediaServices::new(Endpoints::single_host(&server.base_url())));

    let msg = json!({"topic": "nothing here"});
    assert_eq!(node.encode(msg.clone()).await.unwrap().message, msg);
    assert_eq!(node.decode(json!({"event_type": "text"}), None).await.unwrap().message["event_type"], "text");
    assert_eq!(node.transcribe(msg.clone()).await.unwrap().message, msg);
    assert_eq!(node.translate(msg.clone()).await.unwrap().message, msg);
    assert_eq!(any.hits_async().await, 0);
}
