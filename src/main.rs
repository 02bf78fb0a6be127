use anyhow::Result;
use tracing::info;

use caro_core::{is_win, Board, Player};
use caro_engine::{Difficulty, Engine, EngineOptions, SearchRequest};

/// Plays a short engine-vs-engine demo game on a 15x15 board.
fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("caro starting");

    let mut engine = Engine::new(EngineOptions::default());
    let mut board = Board::new(15)?;
    let mut side = Player::First;

    for move_number in 1..=40u16 {
        let request = SearchRequest {
            board,
            side,
            difficulty: Difficulty::Medium,
            time_remaining_ms: 30_000,
            increment_ms: 500,
            move_number,
            deadline: None,
        };
        let outcome = engine.find_best_move(&request)?;
        board = board.place(outcome.mv, side)?;
        info!(
            mv = %outcome.mv,
            %side,
            score = outcome.score,
            depth = outcome.depth,
            nodes = outcome.nodes,
            elapsed_ms = outcome.elapsed_ms,
            "move played"
        );

        if is_win(&board, outcome.mv, side) {
            info!(winner = %side, "game over");
            break;
        }
        side = side.opponent();
    }

    println!("{board:?}");
    Ok(())
}
