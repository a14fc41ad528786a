use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::dialog::{fixture, DialogGraph};
use crate::error::GraphError;
use crate::storage::{read_json, write_json_atomic};

// ---------------------------------------------------------------------------
// Game over screen
// ---------------------------------------------------------------------------

/// Outcome of a single walk through the dialog.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Player reached a terminal node.
    Finished {
        replies_taken: usize,
        terminal_node_id: String,
    },
    /// Player typed quit mid-dialog.
    Quit,
}

fn show_game_over(out: &mut impl Write, outcome: &Outcome) -> io::Result<()> {
    writeln!(out, "\n========================================")?;
    writeln!(out, "           END OF DIALOG")?;
    writeln!(out, "========================================")?;

    match outcome {
        Outcome::Finished {
            replies_taken,
            terminal_node_id,
        } => {
            writeln!(out, "  Replies taken: {replies_taken}")?;
            writeln!(out, "  Ended at: {terminal_node_id}")?;
        }
        Outcome::Quit => {
            writeln!(out, "  You walked away mid-conversation.")?;
        }
    }

    writeln!(out, "========================================\n")?;
    writeln!(out, "  [r] Restart    [q] Quit\n")
}

/// Read the player's post-dialog choice. Returns `true` to restart, `false` to quit.
fn prompt_restart(input: &mut impl BufRead, out: &mut impl Write) -> Result<bool> {
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim().to_lowercase().as_str() {
            "r" => return Ok(true),
            "q" => return Ok(false),
            _ => writeln!(out, "  Press [r] to restart or [q] to quit.")?,
        }
    }
}

// ---------------------------------------------------------------------------
// Single walk
// ---------------------------------------------------------------------------

/// Walk `graph` from its current node until a terminal node or quit. `save`
/// runs after every transition so the game script sees the new position.
fn play_round(
    graph: &mut DialogGraph,
    input: &mut impl BufRead,
    out: &mut impl Write,
    mut save: impl FnMut(&DialogGraph),
) -> Result<Outcome> {
    let mut replies_taken = 0;
    info!("Dialog started at node {}", graph.current_node_id());

    loop {
        let node = graph.current().clone();
        writeln!(out, "\n[{}]: {}", node.sender, node.text)?;

        if node.is_terminal() {
            info!("Dialog over at node {}", node.id);
            return Ok(Outcome::Finished {
                replies_taken,
                terminal_node_id: node.id,
            });
        }

        for (i, reply) in node.replies.iter().enumerate() {
            let broken = graph.node(&reply.target_node_id).is_none();
            let marker = if broken { "  (broken link)" } else { "" };
            writeln!(out, "  [{}] {}{}", i + 1, reply.text, marker)?;
        }

        let choice = loop {
            write!(out, "\n[You]: ")?;
            out.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(Outcome::Quit);
            }
            let line = line.trim();
            if line.eq_ignore_ascii_case("q") || line.eq_ignore_ascii_case("quit") {
                return Ok(Outcome::Quit);
            }
            match line.parse::<usize>() {
                Ok(n) if (1..=node.replies.len()).contains(&n) => break n - 1,
                _ => writeln!(out, "(Pick 1-{}, or q to quit.)", node.replies.len())?,
            }
        };

        match graph.select_reply(choice) {
            Ok(_) => {
                replies_taken += 1;
                save(graph);
            }
            Err(e @ GraphError::BrokenLink { .. }) => {
                warn!("{e}");
                writeln!(out, "(That option leads nowhere. Pick another.)")?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Load the graph at `path`, writing the built-in dialog there first if the
/// file does not exist.
fn load_or_init(path: &Path) -> Result<DialogGraph> {
    if !path.exists() {
        info!("{} not found, writing the built-in dialog", path.display());
        let graph = fixture::intro_dialog()?;
        write_json_atomic(path, &graph)?;
        return Ok(graph);
    }
    let graph: DialogGraph =
        read_json(path).with_context(|| format!("failed to load dialog graph {}", path.display()))?;
    for link in graph.unresolved_links() {
        warn!(
            "Reply #{} of node {} targets missing node {}",
            link.index + 1,
            link.node,
            link.target
        );
    }
    Ok(graph)
}

fn persist(path: &Path, graph: &DialogGraph) {
    if let Err(e) = write_json_atomic(path, graph) {
        error!("{e}");
    }
}

/// A saved graph already sitting on a terminal node has nothing left to
/// play, so the built-in dialog is used instead.
fn playable(graph: DialogGraph, out: &mut impl Write) -> Result<DialogGraph> {
    if !graph.is_finished() {
        return Ok(graph);
    }
    warn!("Saved dialog is finished at node {}", graph.current_node_id());
    writeln!(
        out,
        "This dialog already ended at node {}. Starting the built-in dialog instead \
         (run `chatai static` to reset the file).",
        graph.current_node_id()
    )?;
    Ok(fixture::intro_dialog()?)
}

/// Play the dialog stored at `path` until the player quits.
pub fn run(path: &Path) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    let initial = playable(load_or_init(path)?, &mut out)?;

    loop {
        let mut graph = initial.clone();
        let outcome = play_round(&mut graph, &mut input, &mut out, |g| persist(path, g))?;
        show_game_over(&mut out, &outcome)?;

        if !prompt_restart(&mut input, &mut out)? {
            writeln!(out, "Bye!")?;
            break;
        }

        info!("Player chose to restart");
        persist(path, &initial);
    }

    Ok(())
}
