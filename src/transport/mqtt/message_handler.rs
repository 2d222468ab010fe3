//! Pure routing of rumqttc events onto [`TransportEvents`]
//!
//! [`MessageHandler::route_mqtt_event`] and [`MessageHandler::route_error`]
//! classify what the event loop saw; [`MessageHandler::dispatch`] delivers the
//! result to the registered handler and tracks whether the link is up.
//!
//! The link flag is updated before the handler runs, so a handler that
//! reacts to a CONNACK by disconnecting sees the link as up.

use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};
use std::sync::atomic::{AtomicBool, Ordering};

use super::connection::connect_code;
use crate::transport::{
    ConnectCode, InboundMessage, LogLevel, TransportEvents, DISCONNECT_CONNECTION_LOST,
    DISCONNECT_NORMAL,
};

/// Granted-QoS entry reported for a rejected subscription
pub const SUBACK_FAILURE: u8 = 0x80;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received, accepted or refused
    ConnectionAcknowledged(ConnectCode),
    /// Application message on a subscribed topic
    MessageReceived(InboundMessage),
    SubscriptionConfirmed { message_id: u16, granted_qos: Vec<u8> },
    /// PUBACK or PUBCOMP completed an outbound publish
    PublishCompleted(u16),
    /// The broker sent DISCONNECT
    BrokerDisconnected,
    /// Our own DISCONNECT went out; the loop should stop
    DisconnectSent,
    /// Other incoming packets (pings, intermediate acks)
    InfrastructureEvent(String),
    /// Outgoing traffic other than DISCONNECT
    OutgoingEvent,
}

/// Routing decisions for event-loop errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorRoute {
    /// The broker refused the connection
    Refused(ConnectCode),
    /// I/O, protocol or timeout failure
    NetworkError(String),
}

/// What the event loop should do after dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(connack) => {
                    EventRoute::ConnectionAcknowledged(connect_code(connack.code))
                }
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    qos: publish.qos as u8,
                    retain: publish.retain,
                }),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    message_id: suback.pkid,
                    granted_qos: suback
                        .return_codes
                        .iter()
                        .map(|code| match code {
                            SubscribeReasonCode::Success(qos) => *qos as u8,
                            SubscribeReasonCode::Failure => SUBACK_FAILURE,
                        })
                        .collect(),
                },
                Packet::PubAck(ack) => EventRoute::PublishCompleted(ack.pkid),
                Packet::PubComp(comp) => EventRoute::PublishCompleted(comp.pkid),
                Packet::Disconnect => EventRoute::BrokerDisconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    pub fn route_error(error: &ConnectionError) -> ErrorRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => ErrorRoute::Refused(connect_code(*code)),
            other => ErrorRoute::NetworkError(other.to_string()),
        }
    }

    /// Deliver a routed event, updating `link_up` to track the link
    pub fn dispatch(
        route: EventRoute,
        events: &dyn TransportEvents,
        link_up: &AtomicBool,
    ) -> LoopControl {
        match route {
            EventRoute::ConnectionAcknowledged(code) => {
                link_up.store(code.is_accepted(), Ordering::SeqCst);
                events.on_connect(code);
            }
            EventRoute::MessageReceived(message) => events.on_message(message),
            EventRoute::SubscriptionConfirmed {
                message_id,
                granted_qos,
            } => events.on_subscribe(message_id, &granted_qos),
            EventRoute::PublishCompleted(message_id) => events.on_publish(message_id),
            EventRoute::BrokerDisconnected => {
                link_up.store(false, Ordering::SeqCst);
                events.on_disconnect(DISCONNECT_CONNECTION_LOST);
            }
            EventRoute::DisconnectSent => {
                link_up.store(false, Ordering::SeqCst);
                events.on_disconnect(DISCONNECT_NORMAL);
                return LoopControl::Stop;
            }
            EventRoute::InfrastructureEvent(description) => {
                events.on_log(LogLevel::Debug, &description);
            }
            EventRoute::OutgoingEvent => {}
        }
        LoopControl::Continue
    }

    /// Deliver an event-loop error
    pub fn dispatch_error(route: ErrorRoute, events: &dyn TransportEvents, link_up: &AtomicBool) {
        match route {
            ErrorRoute::Refused(code) => {
                link_up.store(false, Ordering::SeqCst);
                events.on_connect(code);
            }
            ErrorRoute::NetworkError(description) if link_up.swap(false, Ordering::SeqCst) => {
                events.on_log(LogLevel::Warning, &description);
                events.on_disconnect(DISCONNECT_CONNECTION_LOST);
            }
            ErrorRoute::NetworkError(description) => {
                events.on_log(LogLevel::Warning, &format!("Connection failed: {description}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEvents;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, PubComp, Publish, QoS, SubAck};

    fn incoming(packet: Packet) -> Event {
        Event::Incoming(packet)
    }

    #[test]
    fn test_route_connack() {
        let accepted = incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        let refused = incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));

        assert_eq!(
            MessageHandler::route_mqtt_event(&accepted),
            EventRoute::ConnectionAcknowledged(ConnectCode::Accepted)
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&refused),
            EventRoute::ConnectionAcknowledged(ConnectCode::NotAuthorized)
        );
    }

    #[test]
    fn test_route_publish() {
        let mut publish =
            Publish::new("475/SERIAL/status/current", QoS::AtLeastOnce, vec![0xFF_u8, 0xFE]);
        publish.retain = true;

        let route = MessageHandler::route_mqtt_event(&incoming(Packet::Publish(publish)));

        assert_eq!(
            route,
            EventRoute::MessageReceived(InboundMessage {
                topic: "475/SERIAL/status/current".to_string(),
                payload: Bytes::from_static(&[0xFF, 0xFE]),
                qos: 1,
                retain: true,
            })
        );
    }

    #[test]
    fn test_route_suback_maps_failures() {
        let suback = SubAck::new(
            7,
            vec![
                SubscribeReasonCode::Success(QoS::ExactlyOnce),
                SubscribeReasonCode::Failure,
            ],
        );

        assert_eq!(
            MessageHandler::route_mqtt_event(&incoming(Packet::SubAck(suback))),
            EventRoute::SubscriptionConfirmed {
                message_id: 7,
                granted_qos: vec![2, SUBACK_FAILURE],
            }
        );
    }

    #[test]
    fn test_route_acks_and_disconnects() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&incoming(Packet::PubAck(PubAck::new(3)))),
            EventRoute::PublishCompleted(3)
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&incoming(Packet::PubComp(PubComp::new(4)))),
            EventRoute::PublishCompleted(4)
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&incoming(Packet::Disconnect)),
            EventRoute::BrokerDisconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
        assert!(matches!(
            MessageHandler::route_mqtt_event(&incoming(Packet::PingResp)),
            EventRoute::InfrastructureEvent(_)
        ));
    }

    #[test]
    fn test_route_error() {
        assert_eq!(
            MessageHandler::route_error(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::BadUserNamePassword
            )),
            ErrorRoute::Refused(ConnectCode::BadCredentials)
        );
        assert!(matches!(
            MessageHandler::route_error(&ConnectionError::NetworkTimeout),
            ErrorRoute::NetworkError(_)
        ));
    }

    /// Remembers whether the link looked up while `on_connect` ran
    struct LinkObserver {
        link_up: Arc<AtomicBool>,
        seen_on_connect: Mutex<Vec<bool>>,
    }

    impl TransportEvents for LinkObserver {
        fn on_connect(&self, _code: ConnectCode) {
            self.seen_on_connect
                .lock()
                .unwrap()
                .push(self.link_up.load(Ordering::SeqCst));
        }
        fn on_disconnect(&self, _code: i32) {}
        fn on_message(&self, _message: InboundMessage) {}
        fn on_subscribe(&self, _message_id: u16, _granted_qos: &[u8]) {}
        fn on_publish(&self, _message_id: u16) {}
        fn on_log(&self, _level: LogLevel, _message: &str) {}
    }

    #[test]
    fn test_dispatch_tracks_link_state() {
        let events = RecordingEvents::default();
        let link_up = AtomicBool::new(false);

        let control = MessageHandler::dispatch(
            EventRoute::ConnectionAcknowledged(ConnectCode::Accepted),
            &events,
            &link_up,
        );
        assert_eq!(control, LoopControl::Continue);
        assert!(link_up.load(Ordering::SeqCst));

        let control = MessageHandler::dispatch(EventRoute::DisconnectSent, &events, &link_up);
        assert_eq!(control, LoopControl::Stop);
        assert!(!link_up.load(Ordering::SeqCst));

        assert_eq!(events.connects(), vec![ConnectCode::Accepted]);
        assert_eq!(events.disconnects(), vec![DISCONNECT_NORMAL]);
    }

    #[test]
    fn test_link_is_up_before_handler_sees_accept() {
        let link_up = Arc::new(AtomicBool::new(false));
        let observer = LinkObserver {
            link_up: Arc::clone(&link_up),
            seen_on_connect: Mutex::new(Vec::new()),
        };

        MessageHandler::dispatch(
            EventRoute::ConnectionAcknowledged(ConnectCode::Accepted),
            &observer,
            &link_up,
        );
        MessageHandler::dispatch(
            EventRoute::ConnectionAcknowledged(ConnectCode::NotAuthorized),
            &observer,
            &link_up,
        );

        assert_eq!(*observer.seen_on_connect.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_dispatch_broker_disconnect_is_unexpected() {
        let events = RecordingEvents::default();
        let link_up = AtomicBool::new(true);

        MessageHandler::dispatch(EventRoute::BrokerDisconnected, &events, &link_up);

        assert!(!link_up.load(Ordering::SeqCst));
        assert_eq!(events.disconnects(), vec![DISCONNECT_CONNECTION_LOST]);
    }

    #[test]
    fn test_network_error_only_disconnects_live_links() {
        let events = RecordingEvents::default();
        let link_up = AtomicBool::new(false);

        MessageHandler::dispatch_error(
            ErrorRoute::NetworkError("connection refused".to_string()),
            &events,
            &link_up,
        );
        assert!(events.disconnects().is_empty());
        assert_eq!(events.logs().len(), 1);

        link_up.store(true, Ordering::SeqCst);
        MessageHandler::dispatch_error(
            ErrorRoute::NetworkError("reset by peer".to_string()),
            &events,
            &link_up,
        );
        assert_eq!(events.disconnects(), vec![DISCONNECT_CONNECTION_LOST]);
        assert!(!link_up.load(Ordering::SeqCst));
    }

    #[test]
    fn test_refusal_error_reports_connect_code() {
        let events = RecordingEvents::default();
        let link_up = AtomicBool::new(false);

        MessageHandler::dispatch_error(
            ErrorRoute::Refused(ConnectCode::NotAuthorized),
            &events,
            &link_up,
        );

        assert_eq!(events.connects(), vec![ConnectCode::NotAuthorized]);
        assert!(events.disconnects().is_empty());
    }
}
