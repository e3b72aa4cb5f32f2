//! Pub/sub bookkeeping.
//!
//! Subscription state is tracked per session and the standard
//! confirmation frames are emitted, but there is no message delivery:
//! PUBLISH reports zero receivers. (Delivery is an intentional
//! non-goal of this build.)

use bytes::Bytes;

use hearth_protocol::Reply;

use crate::dispatch::{Ctx, Verdict};

use super::reply;

pub fn subscribe(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut frames = Vec::new();
    for channel in &args[1..] {
        if !ctx.session.subscribed_channels.contains(channel) {
            ctx.session.subscribed_channels.push(channel.clone());
        }
        frames.push(Reply::Array(vec![
            Reply::bulk_string("subscribe"),
            Reply::Bulk(channel.clone()),
            Reply::Integer(subscription_count(ctx) as i64),
        ]));
    }
    reply(concat(frames))
}

pub fn unsubscribe(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut frames = Vec::new();
    if args.len() == 1 {
        ctx.session.subscribed_channels.clear();
        frames.push(Reply::Array(vec![
            Reply::bulk_string("unsubscribe"),
            Reply::Null,
            Reply::Integer(subscription_count(ctx) as i64),
        ]));
    } else {
        for channel in &args[1..] {
            ctx.session.subscribed_channels.retain(|c| c != channel);
            frames.push(Reply::Array(vec![
                Reply::bulk_string("unsubscribe"),
                Reply::Bulk(channel.clone()),
                Reply::Integer(subscription_count(ctx) as i64),
            ]));
        }
    }
    reply(concat(frames))
}

pub fn psubscribe(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut frames = Vec::new();
    for pattern in &args[1..] {
        if !ctx.session.subscribed_patterns.contains(pattern) {
            ctx.session.subscribed_patterns.push(pattern.clone());
        }
        frames.push(Reply::Array(vec![
            Reply::bulk_string("psubscribe"),
            Reply::Bulk(pattern.clone()),
            Reply::Integer(subscription_count(ctx) as i64),
        ]));
    }
    reply(concat(frames))
}

pub fn punsubscribe(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut frames = Vec::new();
    if args.len() == 1 {
        ctx.session.subscribed_patterns.clear();
        frames.push(Reply::Array(vec![
            Reply::bulk_string("punsubscribe"),
            Reply::Null,
            Reply::Integer(subscription_count(ctx) as i64),
        ]));
    } else {
        for pattern in &args[1..] {
            ctx.session.subscribed_patterns.retain(|p| p != pattern);
            frames.push(Reply::Array(vec![
                Reply::bulk_string("punsubscribe"),
                Reply::Bulk(pattern.clone()),
                Reply::Integer(subscription_count(ctx) as i64),
            ]));
        }
    }
    reply(concat(frames))
}

pub fn publish(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.no_propagate = true;
    // no delivery: zero receivers
    reply(Reply::Integer(0))
}

fn subscription_count(ctx: &Ctx<'_>) -> usize {
    ctx.session.subscribed_channels.len() + ctx.session.subscribed_patterns.len()
}

/// Several confirmation frames go out back-to-back as one write.
fn concat(frames: Vec<Reply>) -> Reply {
    if frames.len() == 1 {
        frames.into_iter().next().unwrap()
    } else {
        let mut buf = bytes::BytesMut::new();
        for f in frames {
            // subscription confirmations are protocol-stable across
            // RESP versions in this form
            f.serialize(&mut buf, hearth_protocol::RespVersion::Resp2);
        }
        Reply::Raw(buf.freeze())
    }
}
