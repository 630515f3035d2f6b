use ocpp_core::command::NotifyDisplayMessages;
use ocpp_core::payloads::{
    ClearDisplayMessageRequest, ClearDisplayMessageResponse, ClearMessageStatus,
    DisplayMessageStatus, GetDisplayMessagesRequest, GetDisplayMessagesResponse,
    GetDisplayMessagesStatus, NotifyDisplayMessagesRequest, SetDisplayMessageRequest,
    SetDisplayMessageResponse, StatusInfo,
};

use super::{FollowUp, Handled, HandlerResult};
use crate::station::Station;

pub fn set(station: &Station, request: SetDisplayMessageRequest) -> HandlerResult<SetDisplayMessageResponse> {
    let id = request.message.id;
    let response = if station.store().insert_display_message(request.message) {
        SetDisplayMessageResponse {
            status: DisplayMessageStatus::Accepted,
            status_info: None,
        }
    } else {
        tracing::debug!(message = id, "display message id already in use");
        SetDisplayMessageResponse {
            status: DisplayMessageStatus::Rejected,
            status_info: StatusInfo::reason("DuplicateId"),
        }
    };
    Ok(Handled::reply(response))
}

/// Matches are reported asynchronously through NotifyDisplayMessages.
pub fn get(station: &Station, request: GetDisplayMessagesRequest) -> HandlerResult<GetDisplayMessagesResponse> {
    let matches = station.store().display_messages(|message| {
        (request.id.is_empty() || request.id.contains(&message.id))
            && request.state.map_or(true, |state| message.state == Some(state))
            && request.priority.map_or(true, |priority| message.priority == priority)
    });

    if matches.is_empty() {
        return Ok(Handled::reply(GetDisplayMessagesResponse {
            status: GetDisplayMessagesStatus::Unknown,
            status_info: None,
        }));
    }

    let notify = FollowUp::immediate::<NotifyDisplayMessages>(&NotifyDisplayMessagesRequest {
        request_id: request.request_id,
        tbc: false,
        message_info: matches,
    })?;
    Ok(Handled::reply(GetDisplayMessagesResponse {
        status: GetDisplayMessagesStatus::Accepted,
        status_info: None,
    })
    .then(notify))
}

pub fn clear(station: &Station, request: ClearDisplayMessageRequest) -> HandlerResult<ClearDisplayMessageResponse> {
    let removed = station
        .store()
        .display_message(request.id)
        .map_or(false, |current| station.store().remove_display_message(request.id, &current));

    Ok(Handled::reply(ClearDisplayMessageResponse {
        status: if removed {
            ClearMessageStatus::Accepted
        } else {
            ClearMessageStatus::Unknown
        },
        status_info: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use ocpp_core::payloads::{MessageContent, MessageFormat, MessageInfo, MessagePriority, MessageState};
    use ocpp_core::Action;

    fn message(id: i32, priority: MessagePriority, state: Option<MessageState>) -> SetDisplayMessageRequest {
        SetDisplayMessageRequest {
            message: MessageInfo {
                id,
                priority,
                state,
                message: MessageContent {
                    format: MessageFormat::UTF8,
                    language: Some("en".to_string()),
                    content: format!("message {}", id),
                },
                transaction_id: None,
            },
        }
    }

    fn query(ids: Vec<i32>, priority: Option<MessagePriority>, state: Option<MessageState>) -> GetDisplayMessagesRequest {
        GetDisplayMessagesRequest {
            id: ids,
            request_id: 11,
            priority,
            state,
        }
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let station = testkit::station();
        let first = set(&station, message(1, MessagePriority::NormalCycle, None)).unwrap();
        assert_eq!(first.response.status, DisplayMessageStatus::Accepted);

        let second = set(&station, message(1, MessagePriority::InFront, None)).unwrap();
        assert_eq!(second.response.status, DisplayMessageStatus::Rejected);

        let third = set(&station, message(2, MessagePriority::InFront, None)).unwrap();
        assert_eq!(third.response.status, DisplayMessageStatus::Accepted);
    }

    #[test]
    fn filtered_retrieval() {
        let station = testkit::station();
        set(&station, message(1, MessagePriority::NormalCycle, Some(MessageState::Idle))).unwrap();
        set(&station, message(2, MessagePriority::InFront, Some(MessageState::Charging))).unwrap();
        set(&station, message(3, MessagePriority::InFront, None)).unwrap();

        let all = get(&station, query(vec![], None, None)).unwrap();
        assert_eq!(all.response.status, GetDisplayMessagesStatus::Accepted);
        assert_eq!(all.follow_ups.len(), 1);
        assert_eq!(all.follow_ups[0].action, Action::NotifyDisplayMessages);
        assert_eq!(all.follow_ups[0].payload["messageInfo"].as_array().unwrap().len(), 3);
        assert_eq!(all.follow_ups[0].payload["requestId"], 11);

        let in_front = get(&station, query(vec![], Some(MessagePriority::InFront), None)).unwrap();
        let ids: Vec<i64> = in_front.follow_ups[0].payload["messageInfo"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 3]);

        let charging = get(&station, query(vec![1, 2], None, Some(MessageState::Charging))).unwrap();
        assert_eq!(charging.follow_ups[0].payload["messageInfo"][0]["id"], 2);

        let none = get(&station, query(vec![9], None, None)).unwrap();
        assert_eq!(none.response.status, GetDisplayMessagesStatus::Unknown);
        assert!(none.follow_ups.is_empty());
    }

    #[test]
    fn clear_message() {
        let station = testkit::station();
        set(&station, message(1, MessagePriority::NormalCycle, None)).unwrap();

        let cleared = clear(&station, ClearDisplayMessageRequest { id: 1 }).unwrap();
        assert_eq!(cleared.response.status, ClearMessageStatus::Accepted);

        let again = clear(&station, ClearDisplayMessageRequest { id: 1 }).unwrap();
        assert_eq!(again.response.status, ClearMessageStatus::Unknown);
    }
}
