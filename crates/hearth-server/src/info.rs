//! INFO rendering.

use std::sync::atomic::Ordering;

use crate::state::{Runtime, Shared};

/// Renders the INFO text, optionally restricted to one section.
pub fn render(rt: &Runtime, shared: &Shared, section: Option<&str>) -> String {
    let wanted = |name: &str| match section {
        None => true,
        Some(s) => {
            s.eq_ignore_ascii_case(name) || s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("everything")
        }
    };
    let mut out = String::new();

    if wanted("server") {
        let uptime = rt.started_at.elapsed().as_secs().max(1);
        out.push_str("# Server\r\n");
        out.push_str("redis_version:7.2.5\r\n");
        out.push_str("redis_mode:standalone\r\n");
        out.push_str("arch_bits:64\r\n");
        out.push_str(&format!("process_id:{}\r\n", std::process::id()));
        out.push_str(&format!("run_id:{}\r\n", shared.repl.replication_id));
        out.push_str(&format!("tcp_port:{}\r\n", rt.startup.port));
        out.push_str(&format!("uptime_in_seconds:{uptime}\r\n"));
        out.push_str(&format!("uptime_in_days:{}\r\n", uptime / 86400));
        out.push_str("\r\n");
    }

    if wanted("clients") {
        out.push_str("# Clients\r\n");
        out.push_str(&format!(
            "connected_clients:{}\r\n",
            rt.connected_clients.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("maxclients:{}\r\n", shared.config.maxclients));
        out.push_str("blocked_clients:0\r\n");
        out.push_str("\r\n");
    }

    if wanted("memory") {
        let used = shared.store.used_memory();
        out.push_str("# Memory\r\n");
        out.push_str(&format!("used_memory:{used}\r\n"));
        out.push_str(&format!("used_memory_human:{}\r\n", human_bytes(used)));
        out.push_str(&format!("maxmemory:{}\r\n", shared.config.maxmemory));
        out.push_str(&format!(
            "maxmemory_policy:{}\r\n",
            shared.config.maxmemory_policy
        ));
        out.push_str("\r\n");
    }

    if wanted("persistence") {
        out.push_str("# Persistence\r\n");
        out.push_str("loading:0\r\n");
        out.push_str(&format!("rdb_changes_since_last_save:{}\r\n", shared.dirty));
        out.push_str(&format!("rdb_last_save_time:{}\r\n", shared.lastsave_unix));
        out.push_str("rdb_bgsave_in_progress:0\r\n");
        out.push_str("rdb_last_bgsave_status:ok\r\n");
        out.push_str(&format!(
            "aof_enabled:{}\r\n",
            i32::from(shared.aof.is_enabled())
        ));
        out.push_str("aof_rewrite_in_progress:0\r\n");
        out.push_str("aof_last_bgrewrite_status:ok\r\n");
        out.push_str("\r\n");
    }

    if wanted("stats") {
        out.push_str("# Stats\r\n");
        out.push_str(&format!(
            "total_connections_received:{}\r\n",
            rt.total_connections.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "total_commands_processed:{}\r\n",
            shared.stats.total_commands
        ));
        out.push_str(&format!("expired_keys:{}\r\n", shared.stats.expired_keys));
        out.push_str(&format!(
            "total_error_replies:{}\r\n",
            shared.stats.total_error_replies
        ));
        out.push_str("\r\n");
    }

    if wanted("replication") {
        out.push_str("# Replication\r\n");
        let role = if shared.repl.is_replica() {
            "slave"
        } else {
            "master"
        };
        out.push_str(&format!("role:{role}\r\n"));
        if let Some((host, port)) = &shared.repl.master_addr {
            out.push_str(&format!("master_host:{host}\r\n"));
            out.push_str(&format!("master_port:{port}\r\n"));
            out.push_str(&format!(
                "master_link_status:{}\r\n",
                if shared.repl.link_up { "up" } else { "down" }
            ));
        }
        out.push_str(&format!(
            "connected_slaves:{}\r\n",
            shared.repl.connected_replicas
        ));
        out.push_str(&format!("master_replid:{}\r\n", shared.repl.replication_id));
        out.push_str(&format!(
            "master_repl_offset:{}\r\n",
            shared.master_repl_offset
        ));
        out.push_str("\r\n");
    }

    if wanted("commandstats") {
        out.push_str("# Commandstats\r\n");
        let mut rows: Vec<_> = shared.stats.per_command.iter().collect();
        rows.sort_by_key(|(name, _)| name.as_str());
        for (name, stat) in rows {
            out.push_str(&format!(
                "cmdstat_{name}:calls={},rejected_calls={},failed_calls={}\r\n",
                stat.calls, stat.rejected_calls, stat.failed_calls
            ));
        }
        out.push_str("\r\n");
    }

    if wanted("errorstats") {
        out.push_str("# Errorstats\r\n");
        let mut rows: Vec<_> = shared.stats.per_error.iter().collect();
        rows.sort_by_key(|(code, _)| code.as_str());
        for (code, count) in rows {
            out.push_str(&format!("errorstat_{code}:count={count}\r\n"));
        }
        out.push_str("\r\n");
    }

    if wanted("keyspace") {
        out.push_str("# Keyspace\r\n");
        for (db, keys, expires) in shared.store.keyspace_stats() {
            out.push_str(&format!("db{db}:keys={keys},expires={expires},avg_ttl=0\r\n"));
        }
        out.push_str("\r\n");
    }

    out
}

fn human_bytes(n: usize) -> String {
    if n >= 1024 * 1024 * 1024 {
        format!("{:.2}G", n as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if n >= 1024 * 1024 {
        format!("{:.2}M", n as f64 / (1024.0 * 1024.0))
    } else if n >= 1024 {
        format!("{:.2}K", n as f64 / 1024.0)
    } else {
        format!("{n}B")
    }
}
