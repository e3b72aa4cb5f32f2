//! The command table.
//!
//! Every command is a [`CommandSpec`]: arity (negative = minimum),
//! key-position descriptor, flag bitmask, and a plain function-pointer
//! handler. The table is built once and immutable afterwards; module
//! commands are the only runtime extension point and live in
//! [`crate::state::Shared`].

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;

use hearth_protocol::Reply;

use crate::dispatch::{Ctx, Verdict};

mod cluster;
mod hashes;
mod keyspace;
mod lists;
mod pubsub;
mod replication;
mod scripting;
mod server_cmds;
mod sets;
mod strings;
mod streams;
mod transactions;
mod zsets;

pub const WRITE: u32 = 1 << 0;
pub const READONLY: u32 = 1 << 1;
pub const FAST: u32 = 1 << 2;
pub const ADMIN: u32 = 1 << 3;
pub const NOSCRIPT: u32 = 1 << 4;
pub const PUBSUB: u32 = 1 << 5;
pub const LOADING: u32 = 1 << 6;
pub const STALE: u32 = 1 << 7;
pub const NO_AUTH: u32 = 1 << 8;
pub const BLOCKING: u32 = 1 << 9;
pub const DENYOOM: u32 = 1 << 10;

pub type Handler = fn(&mut Ctx<'_>, &[Bytes]) -> Verdict;

pub struct CommandSpec {
    pub name: &'static str,
    /// Exact argument count when ≥ 0, minimum when < 0 (counting the
    /// command name itself).
    pub arity: i32,
    pub flags: u32,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn arity_ok(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= (-self.arity) as usize
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Flag names for COMMAND replies.
    pub fn flag_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for (bit, name) in [
            (WRITE, "write"),
            (READONLY, "readonly"),
            (FAST, "fast"),
            (ADMIN, "admin"),
            (NOSCRIPT, "noscript"),
            (PUBSUB, "pubsub"),
            (LOADING, "loading"),
            (STALE, "stale"),
            (NO_AUTH, "no-auth"),
            (BLOCKING, "blocking"),
            (DENYOOM, "denyoom"),
        ] {
            if self.flags & bit != 0 {
                out.push(name);
            }
        }
        out
    }
}

/// Shorthand for the common handler epilogue.
pub(crate) fn reply(r: Reply) -> Verdict {
    Verdict::Reply(r)
}

pub(crate) fn err(msg: impl Into<String>) -> Verdict {
    Verdict::Reply(Reply::error(msg))
}

pub(crate) fn wrongtype() -> Verdict {
    Verdict::Reply(Reply::error(
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    ))
}

pub fn command_table() -> &'static HashMap<&'static str, CommandSpec> {
    static TABLE: OnceLock<HashMap<&'static str, CommandSpec>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

fn build_table() -> HashMap<&'static str, CommandSpec> {
    let mut t = HashMap::new();
    let mut add = |name: &'static str,
                   arity: i32,
                   flags: u32,
                   first_key: i32,
                   last_key: i32,
                   key_step: i32,
                   handler: Handler| {
        t.insert(
            name,
            CommandSpec {
                name,
                arity,
                flags,
                first_key,
                last_key,
                key_step,
                handler,
            },
        );
    };

    // connection & server
    add("PING", -1, FAST | READONLY, 0, 0, 0, server_cmds::ping);
    add("ECHO", 2, FAST | READONLY, 0, 0, 0, server_cmds::echo);
    add("QUIT", 1, FAST, 0, 0, 0, server_cmds::quit);
    add("HELLO", -1, FAST | NO_AUTH, 0, 0, 0, server_cmds::hello);
    add("AUTH", -2, FAST | NO_AUTH, 0, 0, 0, server_cmds::auth);
    add("CLIENT", -2, ADMIN, 0, 0, 0, server_cmds::client);
    add("SELECT", 2, LOADING, 0, 0, 0, server_cmds::select);
    add("SWAPDB", 3, WRITE, 0, 0, 0, server_cmds::swapdb);
    add("DBSIZE", 1, READONLY | FAST, 0, 0, 0, server_cmds::dbsize);
    add("FLUSHDB", -1, WRITE, 0, 0, 0, server_cmds::flushdb);
    add("FLUSHALL", -1, WRITE, 0, 0, 0, server_cmds::flushall);
    add("INFO", -1, READONLY, 0, 0, 0, server_cmds::info);
    add("CONFIG", -2, ADMIN | LOADING, 0, 0, 0, server_cmds::config);
    add("COMMAND", -1, LOADING | STALE, 0, 0, 0, server_cmds::command);
    add("TIME", 1, READONLY | FAST, 0, 0, 0, server_cmds::time);
    add("DEBUG", -2, ADMIN, 0, 0, 0, server_cmds::debug);
    add("OBJECT", -2, READONLY, 2, 2, 1, server_cmds::object);
    add("SAVE", 1, ADMIN | NOSCRIPT, 0, 0, 0, server_cmds::save);
    add("BGSAVE", 1, ADMIN | NOSCRIPT, 0, 0, 0, server_cmds::bgsave);
    add("LASTSAVE", 1, READONLY | FAST, 0, 0, 0, server_cmds::lastsave);
    add("BGREWRITEAOF", 1, ADMIN | NOSCRIPT, 0, 0, 0, server_cmds::bgrewriteaof);
    add("SHUTDOWN", -1, ADMIN | NOSCRIPT, 0, 0, 0, server_cmds::shutdown);
    add("LOLWUT", -1, READONLY | FAST, 0, 0, 0, server_cmds::lolwut);
    add("MODULE", -2, ADMIN, 0, 0, 0, server_cmds::module);

    // transactions
    add("MULTI", 1, FAST, 0, 0, 0, transactions::multi);
    add("EXEC", 1, FAST, 0, 0, 0, transactions::exec);
    add("DISCARD", 1, FAST, 0, 0, 0, transactions::discard);
    add("WATCH", -2, FAST, 1, -1, 1, transactions::watch);
    add("UNWATCH", 1, FAST, 0, 0, 0, transactions::unwatch);

    // strings
    add("GET", 2, READONLY | FAST, 1, 1, 1, strings::get);
    add("SET", -3, WRITE | DENYOOM, 1, 1, 1, strings::set);
    add("SETNX", 3, WRITE | DENYOOM | FAST, 1, 1, 1, strings::setnx);
    add("SETEX", 4, WRITE | DENYOOM, 1, 1, 1, strings::setex);
    add("PSETEX", 4, WRITE | DENYOOM, 1, 1, 1, strings::psetex);
    add("GETSET", 3, WRITE | DENYOOM, 1, 1, 1, strings::getset);
    add("GETDEL", 2, WRITE | FAST, 1, 1, 1, strings::getdel);
    add("GETEX", -2, WRITE | FAST, 1, 1, 1, strings::getex);
    add("MGET", -2, READONLY | FAST, 1, -1, 1, strings::mget);
    add("MSET", -3, WRITE | DENYOOM, 1, -1, 2, strings::mset);
    add("MSETNX", -3, WRITE | DENYOOM, 1, -1, 2, strings::msetnx);
    add("APPEND", 3, WRITE | DENYOOM, 1, 1, 1, strings::append);
    add("STRLEN", 2, READONLY | FAST, 1, 1, 1, strings::strlen);
    add("INCR", 2, WRITE | DENYOOM | FAST, 1, 1, 1, strings::incr);
    add("DECR", 2, WRITE | DENYOOM | FAST, 1, 1, 1, strings::decr);
    add("INCRBY", 3, WRITE | DENYOOM | FAST, 1, 1, 1, strings::incrby);
    add("DECRBY", 3, WRITE | DENYOOM | FAST, 1, 1, 1, strings::decrby);
    add("INCRBYFLOAT", 3, WRITE | DENYOOM | FAST, 1, 1, 1, strings::incrbyfloat);
    add("SETBIT", 4, WRITE | DENYOOM, 1, 1, 1, strings::setbit);
    add("GETBIT", 3, READONLY | FAST, 1, 1, 1, strings::getbit);
    add("SETRANGE", 4, WRITE | DENYOOM, 1, 1, 1, strings::setrange);
    add("GETRANGE", 4, READONLY, 1, 1, 1, strings::getrange);
    add("LCS", -3, READONLY, 1, 2, 1, strings::lcs);

    // generic keyspace
    add("DEL", -2, WRITE, 1, -1, 1, keyspace::del);
    add("UNLINK", -2, WRITE | FAST, 1, -1, 1, keyspace::del);
    add("EXISTS", -2, READONLY | FAST, 1, -1, 1, keyspace::exists);
    add("TYPE", 2, READONLY | FAST, 1, 1, 1, keyspace::type_cmd);
    add("TTL", 2, READONLY | FAST, 1, 1, 1, keyspace::ttl);
    add("PTTL", 2, READONLY | FAST, 1, 1, 1, keyspace::pttl);
    add("EXPIRETIME", 2, READONLY | FAST, 1, 1, 1, keyspace::expiretime);
    add("PEXPIRETIME", 2, READONLY | FAST, 1, 1, 1, keyspace::pexpiretime);
    add("EXPIRE", -3, WRITE | FAST, 1, 1, 1, keyspace::expire);
    add("PEXPIRE", -3, WRITE | FAST, 1, 1, 1, keyspace::pexpire);
    add("EXPIREAT", -3, WRITE | FAST, 1, 1, 1, keyspace::expireat);
    add("PEXPIREAT", -3, WRITE | FAST, 1, 1, 1, keyspace::pexpireat);
    add("PERSIST", 2, WRITE | FAST, 1, 1, 1, keyspace::persist);
    add("KEYS", 2, READONLY, 0, 0, 0, keyspace::keys);
    add("RANDOMKEY", 1, READONLY | FAST, 0, 0, 0, keyspace::randomkey);
    add("SCAN", -2, READONLY, 0, 0, 0, keyspace::scan);
    add("SORT", -2, WRITE | DENYOOM, 1, 1, 1, keyspace::sort);
    add("RENAME", 3, WRITE, 1, 2, 1, keyspace::rename);
    add("RENAMENX", 3, WRITE | FAST, 1, 2, 1, keyspace::renamenx);
    add("COPY", -3, WRITE | DENYOOM, 1, 2, 1, keyspace::copy);
    add("MOVE", 3, WRITE | FAST, 1, 1, 1, keyspace::move_cmd);
    add("DUMP", 2, READONLY, 1, 1, 1, keyspace::dump);
    add("RESTORE", -4, WRITE | DENYOOM, 1, 1, 1, keyspace::restore);
    add("MIGRATE", -6, WRITE, 0, 0, 0, cluster::migrate);

    // hashes
    add("HSET", -4, WRITE | DENYOOM | FAST, 1, 1, 1, hashes::hset);
    add("HMSET", -4, WRITE | DENYOOM | FAST, 1, 1, 1, hashes::hmset);
    add("HGET", 3, READONLY | FAST, 1, 1, 1, hashes::hget);
    add("HMGET", -3, READONLY | FAST, 1, 1, 1, hashes::hmget);
    add("HSETNX", 4, WRITE | DENYOOM | FAST, 1, 1, 1, hashes::hsetnx);
    add("HDEL", -3, WRITE | FAST, 1, 1, 1, hashes::hdel);
    add("HLEN", 2, READONLY | FAST, 1, 1, 1, hashes::hlen);
    add("HEXISTS", 3, READONLY | FAST, 1, 1, 1, hashes::hexists);
    add("HGETALL", 2, READONLY, 1, 1, 1, hashes::hgetall);
    add("HKEYS", 2, READONLY, 1, 1, 1, hashes::hkeys);
    add("HVALS", 2, READONLY, 1, 1, 1, hashes::hvals);
    add("HINCRBY", 4, WRITE | DENYOOM | FAST, 1, 1, 1, hashes::hincrby);
    add("HINCRBYFLOAT", 4, WRITE | DENYOOM | FAST, 1, 1, 1, hashes::hincrbyfloat);
    add("HSCAN", -3, READONLY, 1, 1, 1, hashes::hscan);

    // lists
    add("LPUSH", -3, WRITE | DENYOOM | FAST, 1, 1, 1, lists::lpush);
    add("RPUSH", -3, WRITE | DENYOOM | FAST, 1, 1, 1, lists::rpush);
    add("LPOP", 2, WRITE | FAST, 1, 1, 1, lists::lpop);
    add("RPOP", 2, WRITE | FAST, 1, 1, 1, lists::rpop);
    add("LLEN", 2, READONLY | FAST, 1, 1, 1, lists::llen);
    add("LRANGE", 4, READONLY, 1, 1, 1, lists::lrange);
    add("LMOVE", 5, WRITE | DENYOOM, 1, 2, 1, lists::lmove);
    add("BLPOP", -3, WRITE | BLOCKING, 1, -2, 1, lists::blpop);
    add("BRPOP", -3, WRITE | BLOCKING, 1, -2, 1, lists::brpop);
    add("BLMOVE", 6, WRITE | DENYOOM | BLOCKING, 1, 2, 1, lists::blmove);
    add("BRPOPLPUSH", 4, WRITE | DENYOOM | BLOCKING, 1, 2, 1, lists::brpoplpush);

    // sets
    add("SADD", -3, WRITE | DENYOOM | FAST, 1, 1, 1, sets::sadd);
    add("SREM", -3, WRITE | FAST, 1, 1, 1, sets::srem);
    add("SISMEMBER", 3, READONLY | FAST, 1, 1, 1, sets::sismember);
    add("SMEMBERS", 2, READONLY, 1, 1, 1, sets::smembers);
    add("SCARD", 2, READONLY | FAST, 1, 1, 1, sets::scard);
    add("SPOP", -2, WRITE | FAST, 1, 1, 1, sets::spop);
    add("SSCAN", -3, READONLY, 1, 1, 1, sets::sscan);

    // sorted sets
    add("ZADD", -4, WRITE | DENYOOM | FAST, 1, 1, 1, zsets::zadd);
    add("ZRANGE", -4, READONLY, 1, 1, 1, zsets::zrange);
    add("ZSCORE", 3, READONLY | FAST, 1, 1, 1, zsets::zscore);
    add("ZCARD", 2, READONLY | FAST, 1, 1, 1, zsets::zcard);
    add("ZSCAN", -3, READONLY, 1, 1, 1, zsets::zscan);
    add("ZPOPMIN", -2, WRITE | FAST, 1, 1, 1, zsets::zpopmin);
    add("ZPOPMAX", -2, WRITE | FAST, 1, 1, 1, zsets::zpopmax);
    add("ZMPOP", -4, WRITE, 0, 0, 0, zsets::zmpop);
    add("BZPOPMIN", -3, WRITE | FAST | BLOCKING, 1, -2, 1, zsets::bzpopmin);
    add("BZPOPMAX", -3, WRITE | FAST | BLOCKING, 1, -2, 1, zsets::bzpopmax);

    // streams
    add("XADD", -5, WRITE | DENYOOM | FAST, 1, 1, 1, streams::xadd);
    add("XLEN", 2, READONLY | FAST, 1, 1, 1, streams::xlen);
    add("XRANGE", -4, READONLY, 1, 1, 1, streams::xrange);
    add("XREVRANGE", -4, READONLY, 1, 1, 1, streams::xrevrange);
    add("XDEL", -3, WRITE | FAST, 1, 1, 1, streams::xdel);
    add("XGROUP", -2, WRITE, 2, 2, 1, streams::xgroup);
    add("XREADGROUP", -7, WRITE, 0, 0, 0, streams::xreadgroup);
    add("XREAD", -4, READONLY | BLOCKING, 0, 0, 0, streams::xread);
    add("XACK", -4, WRITE | FAST, 1, 1, 1, streams::xack);
    add("XPENDING", 3, READONLY, 1, 1, 1, streams::xpending);
    add("XINFO", -3, READONLY, 0, 0, 0, streams::xinfo);

    // scripting
    add("EVAL", -3, WRITE | NOSCRIPT, 0, 0, 0, scripting::eval);
    add("EVALSHA", -3, WRITE | NOSCRIPT, 0, 0, 0, scripting::evalsha);
    add("EVAL_RO", -3, READONLY | NOSCRIPT, 0, 0, 0, scripting::eval_ro);
    add("EVALSHA_RO", -3, READONLY | NOSCRIPT, 0, 0, 0, scripting::evalsha_ro);
    add("SCRIPT", -2, WRITE, 0, 0, 0, scripting::script);
    add("FUNCTION", -2, LOADING | STALE, 0, 0, 0, scripting::function);

    // replication
    add("SYNC", 1, ADMIN, 0, 0, 0, replication::sync);
    add("PSYNC", 3, ADMIN, 0, 0, 0, replication::psync);
    add("REPLCONF", -1, ADMIN, 0, 0, 0, replication::replconf);
    add("REPLICAOF", 3, ADMIN, 0, 0, 0, replication::replicaof);
    add("SLAVEOF", 3, ADMIN, 0, 0, 0, replication::replicaof);
    add("WAIT", 3, NOSCRIPT, 0, 0, 0, replication::wait);

    // cluster
    add("CLUSTER", -2, ADMIN, 0, 0, 0, cluster::cluster);
    add("ASKING", 1, FAST, 0, 0, 0, cluster::asking);
    add("READONLY", 1, FAST, 0, 0, 0, cluster::readonly);
    add("READWRITE", 1, FAST, 0, 0, 0, cluster::readwrite);

    // pub/sub bookkeeping
    add("SUBSCRIBE", -2, PUBSUB, 0, 0, 0, pubsub::subscribe);
    add("UNSUBSCRIBE", -1, PUBSUB, 0, 0, 0, pubsub::unsubscribe);
    add("PSUBSCRIBE", -2, PUBSUB, 0, 0, 0, pubsub::psubscribe);
    add("PUNSUBSCRIBE", -1, PUBSUB, 0, 0, 0, pubsub::punsubscribe);
    add("PUBLISH", 3, WRITE | PUBSUB | FAST, 1, 1, 1, pubsub::publish);

    t
}
