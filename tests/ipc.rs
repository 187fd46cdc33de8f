use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vectord::ipc::{self, Command, QueryParams, Request, Response, SocketBuffer};

#[tokio::test]
async fn frames_are_le_length_then_json() {
   let (mut client, mut server) = tokio::io::duplex(1024);
   let request = Request::with_params(Command::QuerySimilar, &QueryParams {
      text:      "socket".to_string(),
      n_results: 2,
   })
   .unwrap();

   let mut buffer = SocketBuffer::new();
   buffer.send(&mut client, &request).await.unwrap();
   drop(client);

   let mut raw = Vec::new();
   server.read_to_end(&mut raw).await.unwrap();
   let len = u32::from_le_bytes(raw[..4].try_into().unwrap()) as usize;
   assert_eq!(len, raw.len() - 4);

   let body: Value = serde_json::from_slice(&raw[4..]).unwrap();
   assert_eq!(
      body,
      json!({
         "version": 1,
         "command": "query_similar",
         "params": {"text": "socket", "n_results": 2},
      })
   );
}

#[tokio::test]
async fn hand_written_frame_decodes_as_request() {
   let (mut client, mut server) = tokio::io::duplex(256);
   let body = br#"{"command":"get_stored_files"}"#;
   client
      .write_all(&(body.len() as u32).to_le_bytes())
      .await
      .unwrap();
   client.write_all(body).await.unwrap();

   let mut buffer = SocketBuffer::new();
   let request: Request = buffer.recv(&mut server).await.unwrap();
   assert_eq!(request.version, ipc::PROTOCOL_VERSION);
   assert_eq!(Command::parse(&request.command), Some(Command::GetStoredFiles));
   assert_eq!(request.params, Value::Null);
}

#[tokio::test]
async fn both_response_shapes_cross_the_wire() {
   let (mut client, mut server) = tokio::io::duplex(1024);
   let mut out = SocketBuffer::new();
   out.send(&mut server, &Response::ok_with(&["a.rs", "b.rs"]))
      .await
      .unwrap();
   out.send(&mut server, &Response::error("Service not initialized"))
      .await
      .unwrap();

   let mut buffer = SocketBuffer::new();
   let first: Response = buffer.recv(&mut client).await.unwrap();
   assert!(first.is_success());
   assert_eq!(first.into_data("add_files").unwrap(), Some(json!(["a.rs", "b.rs"])));

   let second: Response = buffer.recv(&mut client).await.unwrap();
   assert_eq!(second.error_message(), Some("Service not initialized"));
}

#[test]
fn only_version_one_is_spoken() {
   assert_eq!(ipc::PROTOCOL_VERSIONS, &[1]);
   let request = Request { version: 0, ..Request::new(Command::Ping) };
   assert!(request.check_version().is_err());
}
