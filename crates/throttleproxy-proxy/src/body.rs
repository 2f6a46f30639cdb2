//! Outbound response bodies
//!
//! Every response the proxy sends uses [`ProxyBody`]. Forwarded responses
//! stream the origin body through the key's throttle channel, releasing each
//! chunk only once the channel grants its bytes.

use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use throttleproxy_core::domain::TerminalState;
use throttleproxy_throttle::ThrottleChannel;
use tracing::debug;

use crate::completion::TransferCompletion;
use crate::{BoxError, ProxyError};

/// Body type for every response the proxy produces
pub type ProxyBody = UnsyncBoxBody<Bytes, ProxyError>;

type OriginStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// A complete, in-memory body.
pub fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

struct Relay {
    origin: OriginStream,
    channel: ThrottleChannel,
    completion: TransferCompletion,
}

/// Streams `origin` to the caller through `channel`.
///
/// Reaching the end of the origin body finishes the transfer as completed and
/// an origin error finishes it as errored. If the caller goes away first the
/// body is dropped mid-stream and `completion` classifies the outcome itself.
pub fn relay<S, E>(origin: S, channel: ThrottleChannel, completion: TransferCompletion) -> ProxyBody
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let state = Relay {
        origin: Box::pin(origin.map(|chunk| chunk.map_err(Into::into))),
        channel,
        completion,
    };

    let frames = stream::unfold(Some(state), |state| async move {
        let mut relay = state?;
        match relay.origin.next().await {
            Some(Ok(chunk)) => {
                let len = chunk.len() as u64;
                relay.channel.throttle(len).await;
                relay.completion.add_relayed(len);
                Some((Ok(Frame::data(chunk)), Some(relay)))
            }
            Some(Err(source)) => {
                let url = relay.completion.url().unwrap_or_default().to_string();
                debug!(url = %url, error = %source, "Origin body failed");
                relay.completion.finish(TerminalState::Errored);
                Some((Err(ProxyError::Relay { url, source }), None))
            }
            None => {
                relay.completion.finish(TerminalState::Completed);
                None
            }
        }
    });

    StreamBody::new(frames).boxed_unsync()
}
