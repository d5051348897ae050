//! Command routing.
//!
//! Turns one decoded `request` into exactly one `response`. Special
//! event-listener commands are handled here; everything else parses as
//! `Service.Method` and dispatches to the registry. Every failure mode
//! becomes an error response — the router never faults the connection.

use crate::registry::{ClientHandle, ClientRegistry, ListenerInfo};
use crate::service::{ServiceError, ServiceRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use wirebus_protocol::error::codes;
use wirebus_protocol::{ErrorBody, Message, MethodCommand, SpecialCommand};

/// Routes requests to services and the event multiplexer.
pub struct CommandRouter {
    services: Arc<ServiceRegistry>,
    registry: Arc<ClientRegistry>,
}

impl CommandRouter {
    pub fn new(services: Arc<ServiceRegistry>, registry: Arc<ClientRegistry>) -> Self {
        Self { services, registry }
    }

    /// Handles one request, returning its response message.
    pub async fn dispatch(
        &self,
        client: &Arc<ClientHandle>,
        uuid: Uuid,
        command: &str,
        params: Vec<Value>,
    ) -> Message {
        if let Some(special) = SpecialCommand::from_command(command) {
            return self.dispatch_special(client, uuid, special, params);
        }

        let method = match MethodCommand::parse(command) {
            Ok(method) => method,
            Err(e) => {
                return Message::error(
                    uuid,
                    ErrorBody::new(e.to_string()).with_code(codes::MALFORMED_COMMAND),
                );
            }
        };

        let Some(service) = self.services.get(&method.service_name) else {
            return Message::error(
                uuid,
                ErrorBody::new(format!("service not found: {}", method.service_name))
                    .with_code(codes::UNKNOWN_SERVICE),
            );
        };

        match service.call(&method.method_name, params).await {
            Ok(result) => Message::success(uuid, result),
            Err(ServiceError::UnknownMethod(_)) => Message::error(
                uuid,
                ErrorBody::new(format!("method not found: {}", method))
                    .with_code(codes::UNKNOWN_METHOD),
            ),
            Err(ServiceError::Failed(message)) => {
                tracing::debug!("handler {} failed: {}", method, message);
                Message::error(uuid, ErrorBody::new(message).with_code(codes::HANDLER_ERROR))
            }
        }
    }

    fn dispatch_special(
        &self,
        client: &Arc<ClientHandle>,
        uuid: Uuid,
        special: SpecialCommand,
        params: Vec<Value>,
    ) -> Message {
        match special {
            SpecialCommand::AddEventListener => {
                let mut params = params.into_iter();
                let key = params.next().and_then(as_string);
                let event_name = params.next().and_then(as_string);
                let info = params.next().unwrap_or(Value::Null);

                let (Some(key), Some(event_name)) = (key, event_name) else {
                    return invalid_params(uuid, special);
                };

                client.add_listener(ListenerInfo {
                    key,
                    event_name,
                    info,
                });
                Message::success(uuid, Value::Null)
            }
            SpecialCommand::RemoveEventListener => {
                let Some(key) = params.into_iter().next().and_then(as_string) else {
                    return invalid_params(uuid, special);
                };
                client.remove_listener(&key);
                Message::success(uuid, Value::Null)
            }
            SpecialCommand::GetEventListenerInfos => {
                let Some(event_name) = params.into_iter().next().and_then(as_string) else {
                    return invalid_params(uuid, special);
                };
                let infos: Vec<Value> = self
                    .registry
                    .listener_infos_for(&event_name)
                    .into_iter()
                    .map(|l| json!({"key": l.key, "info": l.info}))
                    .collect();
                Message::success(uuid, Value::Array(infos))
            }
            SpecialCommand::EmitEvent => {
                let mut params = params.into_iter();
                let keys = params.next().and_then(|v| {
                    serde_json::from_value::<Vec<String>>(v).ok()
                });
                let data = params.next().unwrap_or(Value::Null);

                let Some(keys) = keys else {
                    return invalid_params(uuid, special);
                };

                let queued = self.registry.emit_to_keys(&keys, &data);
                tracing::debug!("emitEvent queued {} messages", queued);
                Message::success(uuid, Value::Null)
            }
        }
    }
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn invalid_params(uuid: Uuid, special: SpecialCommand) -> Message {
    Message::error(
        uuid,
        ErrorBody::new(format!("invalid parameters for {}", special.as_str()))
            .with_code(codes::MALFORMED_COMMAND),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceFuture};
    use tokio::sync::mpsc;
    use wirebus_protocol::ResponseState;

    struct EchoService;

    impl Service for EchoService {
        fn call<'a>(&'a self, method: &'a str, mut params: Vec<Value>) -> ServiceFuture<'a> {
            Box::pin(async move {
                match method {
                    "echo" => Ok(params.drain(..).next().unwrap_or(Value::Null)),
                    "fail" => Err(ServiceError::failed("intentional failure")),
                    other => Err(ServiceError::UnknownMethod(other.to_string())),
                }
            })
        }
    }

    fn router_with_echo() -> (CommandRouter, Arc<ClientHandle>, mpsc::Receiver<Message>) {
        let mut services = ServiceRegistry::new();
        services.register("EchoService", Arc::new(EchoService));
        let registry = Arc::new(ClientRegistry::new());

        let (tx, rx) = mpsc::channel(16);
        let client = Arc::new(ClientHandle::new(
            "c1".to_string(),
            "127.0.0.1:50000".parse().unwrap(),
            tx,
        ));
        registry.register(client.clone());

        (
            CommandRouter::new(Arc::new(services), registry),
            client,
            rx,
        )
    }

    fn assert_error_code(message: &Message, expected: &str) {
        match message {
            Message::Response {
                state: ResponseState::Error,
                body,
                ..
            } => {
                let detail: ErrorBody = serde_json::from_value(body.clone()).unwrap();
                assert_eq!(detail.code.as_deref(), Some(expected));
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let (router, client, _rx) = router_with_echo();
        let uuid = Uuid::new_v4();

        let response = router
            .dispatch(&client, uuid, "EchoService.echo", vec![json!("hi")])
            .await;

        match response {
            Message::Response {
                req_uuid,
                state: ResponseState::Success,
                body,
            } => {
                assert_eq!(req_uuid, uuid);
                assert_eq!(body, json!("hi"));
            }
            other => panic!("expected success response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_command_is_error_response() {
        let (router, client, _rx) = router_with_echo();
        let response = router
            .dispatch(&client, Uuid::new_v4(), "Foo", vec![])
            .await;
        assert_error_code(&response, codes::MALFORMED_COMMAND);
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let (router, client, _rx) = router_with_echo();
        let response = router
            .dispatch(&client, Uuid::new_v4(), "Missing.method", vec![])
            .await;
        assert_error_code(&response, codes::UNKNOWN_SERVICE);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (router, client, _rx) = router_with_echo();
        let response = router
            .dispatch(&client, Uuid::new_v4(), "EchoService.missing", vec![])
            .await;
        assert_error_code(&response, codes::UNKNOWN_METHOD);
    }

    #[tokio::test]
    async fn test_handler_error_isolated() {
        let (router, client, _rx) = router_with_echo();

        let uuid = Uuid::new_v4();
        let response = router
            .dispatch(&client, uuid, "EchoService.fail", vec![])
            .await;
        assert_error_code(&response, codes::HANDLER_ERROR);
        match &response {
            Message::Response { req_uuid, .. } => assert_eq!(*req_uuid, uuid),
            _ => unreachable!(),
        }

        // The router keeps serving after a handler failure.
        let response = router
            .dispatch(&client, Uuid::new_v4(), "EchoService.echo", vec![json!(1)])
            .await;
        match response {
            Message::Response {
                state: ResponseState::Success,
                ..
            } => {}
            other => panic!("expected success after failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_lifecycle_via_special_commands() {
        let (router, client, mut rx) = router_with_echo();

        let response = router
            .dispatch(
                &client,
                Uuid::new_v4(),
                "addEventListener",
                vec![json!("k1"), json!("DataChanged"), json!({"scope": "x"})],
            )
            .await;
        assert!(matches!(
            response,
            Message::Response {
                state: ResponseState::Success,
                ..
            }
        ));

        // The registration is visible to emitters.
        let response = router
            .dispatch(
                &client,
                Uuid::new_v4(),
                "getEventListenerInfos",
                vec![json!("DataChanged")],
            )
            .await;
        match &response {
            Message::Response { body, .. } => {
                assert_eq!(body.as_array().unwrap().len(), 1);
                assert_eq!(body[0]["key"], "k1");
            }
            _ => unreachable!(),
        }

        // Emitting to the key delivers an event on the client's queue.
        router
            .dispatch(
                &client,
                Uuid::new_v4(),
                "emitEvent",
                vec![json!(["k1"]), json!({"n": 5})],
            )
            .await;
        match rx.try_recv().unwrap() {
            Message::Event { key, body } => {
                assert_eq!(key, "k1");
                assert_eq!(body["n"], 5);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // Removal stops future delivery.
        router
            .dispatch(
                &client,
                Uuid::new_v4(),
                "removeEventListener",
                vec![json!("k1")],
            )
            .await;
        router
            .dispatch(
                &client,
                Uuid::new_v4(),
                "emitEvent",
                vec![json!(["k1"]), json!({"n": 6})],
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_special_command_invalid_params() {
        let (router, client, _rx) = router_with_echo();
        let response = router
            .dispatch(&client, Uuid::new_v4(), "addEventListener", vec![json!(42)])
            .await;
        assert_error_code(&response, codes::MALFORMED_COMMAND);
    }
}
