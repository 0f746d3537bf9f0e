use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use lansync_core::entities::FileMeta;
use lansync_core::helpers::short_hash;
use lansync_core::utils::Logger;

use crate::state::NetworkState;
use crate::NodeContext;

static LOGGER: Logger = Logger::compact("Shell");

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// The operator loop over stdin. Returns on `exit` or EOF; the process ends
/// with it.
pub fn run_shell(ctx: &NodeContext) -> io::Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{}> {}", GREEN, RESET);
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "status" => status(ctx),
            "sync" => {
                if parts.len() < 2 {
                    LOGGER.warn("sync [all|idx]");
                    continue;
                }
                sync(ctx, parts[1]);
            }
            "rename" => {
                if parts.len() < 3 {
                    LOGGER.warn("rename [idx] [name]");
                    continue;
                }
                rename(ctx, parts[1], parts[2]);
            }
            "vote" => {
                if parts.len() < 3 {
                    LOGGER.warn("vote [idx] [name]");
                    continue;
                }
                vote(ctx, parts[1], parts[2]);
            }
            "exit" => return Ok(()),
            _ => LOGGER.warn("status, sync, rename, vote, exit"),
        }
    }
}

fn local_hashes(ctx: &NodeContext) -> HashSet<String> {
    match ctx.indexer.scan() {
        Ok(files) => files.into_iter().map(|f| f.hash).collect(),
        Err(e) => {
            LOGGER.error(format!("scan failed: {}", e));
            HashSet::new()
        }
    }
}

/// Re-announce ourselves, then print the network view.
fn status(ctx: &NodeContext) {
    let mut local: HashSet<String> = HashSet::new();
    match ctx.indexer.scan() {
        Ok(files) => {
            local = files.iter().map(|f| f.hash.clone()).collect();
            ctx.state.update_peer(&ctx.device_id, files.clone());
            ctx.registry.broadcast_index(&ctx.device_id, files);
        }
        Err(e) => LOGGER.error(format!("scan failed: {}", e)),
    }

    let files = ctx.state.global_view();
    for line in render_status(&files, &local, &ctx.state) {
        println!("{}", line);
    }
}

/// The `status` listing: one line per global entry, annotated with whether
/// we hold the content, whether the name is settled, and whether the name
/// collides with a different hash next to it.
fn render_status(
    files: &[FileMeta],
    local: &HashSet<String>,
    state: &NetworkState,
) -> Vec<String> {
    let mut out = Vec::new();
    out.push(format!("{}\n--- Network ---{}", YELLOW, RESET));

    for (i, f) in files.iter().enumerate() {
        let stat = if local.contains(&f.hash) {
            format!("{}OK{}", GREEN, RESET)
        } else {
            format!("{}MISSING{}", RED, RESET)
        };

        let same_name_before = i > 0 && files[i - 1].relative_path == f.relative_path;
        let same_name_after =
            i + 1 < files.len() && files[i + 1].relative_path == f.relative_path;
        let collision = if same_name_before || same_name_after {
            format!("{} [COLLISION]{}", RED, RESET)
        } else {
            String::new()
        };

        let label = match state.consensus_name(&f.hash) {
            Some((_, true)) => format!("{}Consensus{}", GREEN, RESET),
            _ => format!("{}TIE!{}", YELLOW, RESET),
        };

        out.push(format!(
            "[{}] {} ({}) - {} [{}]{}",
            i,
            f.relative_path,
            short_hash(&f.hash),
            stat,
            label,
            collision
        ));
    }
    out
}

/// `sync all`: request every hash we lack. `sync <i>`: request one entry.
fn sync(ctx: &NodeContext, arg: &str) {
    let files = ctx.state.global_view();
    if arg == "all" {
        let local = local_hashes(ctx);
        let mut requested = 0;
        for f in &files {
            if !local.contains(&f.hash) {
                ctx.registry
                    .broadcast_file_request(&f.hash, &f.relative_path);
                requested += 1;
            }
        }
        LOGGER.info(format!("requested {} files", requested));
        return;
    }

    match arg.parse::<usize>() {
        Ok(i) if i < files.len() => {
            ctx.registry
                .broadcast_file_request(&files[i].hash, &files[i].relative_path);
        }
        _ => LOGGER.warn("sync [all|idx]"),
    }
}

/// Rename locally first; the vote only goes out if the disk agreed.
fn rename(ctx: &NodeContext, idx: &str, new_name: &str) {
    let files = ctx.state.global_view();
    let f = match idx.parse::<usize>() {
        Ok(i) if i < files.len() => &files[i],
        _ => {
            LOGGER.warn("rename [idx] [name]");
            return;
        }
    };

    match ctx.indexer.rename(&f.relative_path, new_name) {
        Ok(()) => {
            ctx.state.set_manual(&f.hash, new_name);
            ctx.registry.broadcast_vote(&f.hash, new_name);
            LOGGER.done(format!("renamed: {}", new_name));
            status(ctx);
        }
        Err(e) => LOGGER.error(format!("rename failed: {}", e)),
    }
}

/// Manual override without touching the disk.
fn vote(ctx: &NodeContext, idx: &str, new_name: &str) {
    let files = ctx.state.global_view();
    let f = match idx.parse::<usize>() {
        Ok(i) if i < files.len() => &files[i],
        _ => {
            LOGGER.warn("vote [idx] [name]");
            return;
        }
    };

    ctx.state.set_manual(&f.hash, new_name);
    ctx.registry.broadcast_vote(&f.hash, new_name);
    LOGGER.done(format!("voted: {} -> {}", short_hash(&f.hash), new_name));
}

#[cfg(test)]
mod func_tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;

    fn test_ctx(folder: PathBuf) -> Arc<NodeContext> {
        NodeContext::new(String::from("shell-node"), folder).unwrap()
    }

    fn meta(path: &str, hash: &str) -> FileMeta {
        FileMeta {
            relative_path: String::from(path),
            size: 1,
            mtime: 0,
            hash: String::from(hash),
        }
    }

    #[test]
    fn test_render_status_marks_missing_and_ok() {
        let state = NetworkState::new();
        state.update_peer("peer", vec![meta("have.txt", "h1"), meta("want.txt", "h2")]);
        let local: HashSet<String> = [String::from("h1")].into_iter().collect();

        let lines = render_status(&state.global_view(), &local, &state);
        assert_eq!(lines.len(), 3); // banner + two entries
        assert!(lines[1].contains("have.txt") && lines[1].contains("OK"));
        assert!(lines[2].contains("want.txt") && lines[2].contains("MISSING"));
    }

    #[test]
    fn test_render_status_marks_tie() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("one.txt", "h1")]);
        state.update_peer("b", vec![meta("two.txt", "h1")]);

        let lines = render_status(&state.global_view(), &HashSet::new(), &state);
        assert!(lines[1].contains("TIE!"));

        // A manual override settles it.
        state.set_manual("h1", "one.txt");
        let lines = render_status(&state.global_view(), &HashSet::new(), &state);
        assert!(lines[1].contains("Consensus"));
    }

    #[test]
    fn test_render_status_marks_collisions_on_both_entries() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("x", "h1")]);
        state.update_peer("b", vec![meta("x", "h2")]);

        let lines = render_status(&state.global_view(), &HashSet::new(), &state);
        assert!(lines[1].contains("[COLLISION]"));
        assert!(lines[2].contains("[COLLISION]"));
    }

    #[test]
    fn test_rename_moves_file_and_sets_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), b"content").unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());

        let files = ctx.indexer.scan().unwrap();
        let hash = files[0].hash.clone();
        ctx.state.update_peer(&ctx.device_id, files);

        rename(&ctx, "0", "new.txt");

        assert!(!dir.path().join("old.txt").exists());
        assert!(dir.path().join("new.txt").exists());
        assert_eq!(
            ctx.state.consensus_name(&hash),
            Some((String::from("new.txt"), true))
        );
    }

    #[test]
    fn test_rename_failure_sets_no_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());

        // An index claiming a file the disk does not have: rename fails.
        ctx.state.update_peer(&ctx.device_id, vec![meta("ghost.txt", "h1")]);
        rename(&ctx, "0", "new.txt");

        assert_eq!(
            ctx.state.consensus_name("h1"),
            Some((String::from("ghost.txt"), true))
        );
    }

    #[test]
    fn test_vote_sets_override_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), b"content").unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());

        let files = ctx.indexer.scan().unwrap();
        let hash = files[0].hash.clone();
        ctx.state.update_peer(&ctx.device_id, files);

        vote(&ctx, "0", "agreed.txt");

        assert!(dir.path().join("old.txt").exists());
        assert_eq!(
            ctx.state.consensus_name(&hash),
            Some((String::from("agreed.txt"), true))
        );
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path().to_path_buf());

        // Nothing to do, nothing to panic on.
        sync(&ctx, "7");
        rename(&ctx, "7", "x.txt");
        vote(&ctx, "not-a-number", "x.txt");
    }
}
