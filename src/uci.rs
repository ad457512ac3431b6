//! UCI front-end.
//!
//! A thin translation layer between the line protocol and the engine
//! core: commands become calls on the worker pool and the parameter
//! registry, search reports become `info` lines. No engine logic lives
//! here.

use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::constants::{is_lose_score, is_win_score, MATE0};
use crate::eval::nn::NetData;
use crate::movegen::parse_uci_move;
use crate::params::{parameters, ParamSpec};
use crate::position::Position;
use crate::search::time::{plan_time, TimeControl};
use crate::search::{InfoCallback, SearchLimits, SearchReport};
use crate::smp::WorkerPool;

const ENGINE_NAME: &str = concat!("Sable ", env!("CARGO_PKG_VERSION"));
const ENGINE_AUTHOR: &str = "the Sable authors";

pub struct UciEngine {
    pool: Arc<WorkerPool>,
    net: Arc<NetData>,
    pos: Position,
    /// Zobrist hashes of every position of the game, root included.
    history: Vec<u64>,
    threads: usize,
    hash_mb: usize,
    search_thread: Option<JoinHandle<()>>,
}

impl UciEngine {
    #[must_use]
    pub fn new(net: Arc<NetData>) -> Self {
        let pos = Position::start();
        let history = vec![pos.zobrist_hash()];
        let threads = parameters().get_int("Threads") as usize;
        let hash_mb = parameters().get_int("Hash") as usize;
        UciEngine {
            pool: Arc::new(WorkerPool::new(threads, hash_mb, Arc::clone(&net))),
            net,
            pos,
            history,
            threads,
            hash_mb,
            search_thread: None,
        }
    }

    /// Handle one protocol line. Returns false on `quit`.
    pub fn handle_command(&mut self, line: &str) -> bool {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("uci") => self.cmd_uci(),
            Some("isready") => {
                self.join_search();
                println!("readyok");
            }
            Some("setoption") => self.cmd_setoption(line),
            Some("ucinewgame") => {
                self.join_search();
                self.pool.clear_hash();
            }
            Some("position") => self.cmd_position(line),
            Some("go") => self.cmd_go(line),
            Some("stop") => {
                self.pool.stop();
                self.join_search();
            }
            Some("ponderhit") => {} // Search continues on its own clock.
            Some("quit") => {
                self.pool.stop();
                self.join_search();
                return false;
            }
            Some(other) => log::warn!("unknown command: {other}"),
            None => {}
        }
        true
    }

    fn cmd_uci(&self) {
        println!("id name {ENGINE_NAME}");
        println!("id author {ENGINE_AUTHOR}");
        let registry = parameters();
        for name in registry.names() {
            let Some(param) = registry.get(&name) else {
                continue;
            };
            match param.spec() {
                ParamSpec::Check { default } => {
                    println!("option name {name} type check default {default}");
                }
                ParamSpec::Spin { default, min, max } => {
                    println!("option name {name} type spin default {default} min {min} max {max}");
                }
                ParamSpec::Combo { default, allowed } => {
                    print!("option name {name} type combo default {default}");
                    for v in allowed {
                        print!(" var {v}");
                    }
                    println!();
                }
                ParamSpec::Text { default } => {
                    let default = if default.is_empty() { "<empty>" } else { default };
                    println!("option name {name} type string default {default}");
                }
                ParamSpec::Button => println!("option name {name} type button"),
            }
        }
        println!("uciok");
    }

    fn cmd_setoption(&mut self, line: &str) {
        // setoption name <N...> [value <V...>]
        let rest = match line.find("name ") {
            Some(i) => &line[i + 5..],
            None => {
                log::warn!("setoption without name");
                return;
            }
        };
        let (name, value) = match rest.find(" value ") {
            Some(i) => (&rest[..i], &rest[i + 7..]),
            None => (rest, ""),
        };
        let name = name.trim();
        let value = value.trim();

        self.join_search();
        if !parameters().set(name, value) {
            log::warn!("option '{name}' rejected value '{value}'");
            return;
        }
        match name.to_ascii_lowercase().as_str() {
            "threads" | "hash" => self.rebuild_pool(),
            "clear hash" => self.pool.clear_hash(),
            _ => {}
        }
    }

    fn rebuild_pool(&mut self) {
        let threads = parameters().get_int("Threads") as usize;
        let hash_mb = parameters().get_int("Hash") as usize;
        if threads != self.threads || hash_mb != self.hash_mb {
            self.threads = threads;
            self.hash_mb = hash_mb;
            self.pool = Arc::new(WorkerPool::new(threads, hash_mb, Arc::clone(&self.net)));
        }
    }

    fn cmd_position(&mut self, line: &str) {
        self.join_search();
        let mut tokens = line.split_whitespace().skip(1).peekable();
        let mut pos = match tokens.peek() {
            Some(&"startpos") => {
                tokens.next();
                Position::start()
            }
            Some(&"fen") => {
                tokens.next();
                let mut fen_parts = Vec::new();
                while let Some(&t) = tokens.peek() {
                    if t == "moves" {
                        break;
                    }
                    fen_parts.push(t);
                    tokens.next();
                }
                match fen_parts.join(" ").parse::<Position>() {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("bad FEN: {e}");
                        return;
                    }
                }
            }
            _ => {
                log::warn!("bad position command");
                return;
            }
        };

        let mut history = vec![pos.zobrist_hash()];
        if tokens.peek() == Some(&&"moves") {
            tokens.next();
            for mv_str in tokens {
                match parse_uci_move(&pos, mv_str) {
                    Ok(m) => {
                        let _ = pos.make_move(m);
                        history.push(pos.zobrist_hash());
                    }
                    Err(e) => {
                        log::warn!("bad move in position command: {e}");
                        return;
                    }
                }
            }
        }
        self.pos = pos;
        self.history = history;
    }

    fn cmd_go(&mut self, line: &str) {
        self.join_search();

        let mut tc = TimeControl::default();
        let mut limits = SearchLimits::default();
        let mut tokens = line.split_whitespace().skip(1);
        let mut search_moves = Vec::new();
        let mut in_search_moves = false;
        while let Some(tok) = tokens.next() {
            let mut num = |tokens: &mut dyn Iterator<Item = &str>| {
                tokens.next().and_then(|v| v.parse::<u64>().ok())
            };
            match tok {
                "wtime" => tc.wtime = num(&mut tokens),
                "btime" => tc.btime = num(&mut tokens),
                "winc" => tc.winc = num(&mut tokens).unwrap_or(0),
                "binc" => tc.binc = num(&mut tokens).unwrap_or(0),
                "movestogo" => tc.moves_to_go = num(&mut tokens).map(|v| v as u32),
                "movetime" => tc.movetime = num(&mut tokens),
                "infinite" => tc.infinite = true,
                "ponder" => tc.ponder = true,
                "depth" => limits.max_depth = num(&mut tokens).unwrap_or(0) as i32,
                "nodes" => limits.max_nodes = num(&mut tokens).unwrap_or(0),
                "mate" => limits.mate_in = num(&mut tokens).map(|v| v as i32),
                "searchmoves" => in_search_moves = true,
                other if in_search_moves => {
                    if let Ok(m) = parse_uci_move(&self.pos, other) {
                        search_moves.push(m);
                    }
                }
                other => log::warn!("unknown go token: {other}"),
            }
        }
        if !search_moves.is_empty() {
            limits.search_moves = Some(search_moves);
        }
        if let Some(plan) = plan_time(&tc, self.pos.is_white_move()) {
            limits.soft_time_ms = Some(plan.soft_ms);
            limits.hard_time_ms = Some(plan.hard_ms);
        }

        let contempt = self.contempt_for_position();
        self.pool.set_position(&self.pos, &self.history);

        let pool = Arc::clone(&self.pool);
        let info: InfoCallback = Arc::new(print_info);
        self.search_thread = Some(std::thread::spawn(move || {
            let result = pool.search(&limits, Some(info), contempt);
            let best = result
                .best_move
                .map_or_else(|| "0000".to_owned(), |m| m.to_string());
            match result.ponder_move {
                Some(p) => println!("bestmove {best} ponder {p}"),
                None => println!("bestmove {best}"),
            }
        }));
    }

    /// Contempt from White's point of view: zero in analysis mode,
    /// otherwise the configured value signed by the engine's colour.
    fn contempt_for_position(&self) -> i32 {
        let p = parameters();
        if p.get_bool("UCI_AnalyseMode") {
            return p.get_int("AnalyzeContempt");
        }
        let c = p.get_int("Contempt");
        if self.pos.is_white_move() {
            c
        } else {
            -c
        }
    }

    fn join_search(&mut self) {
        if let Some(t) = self.search_thread.take() {
            let _ = t.join();
        }
    }
}

fn print_info(report: &SearchReport) {
    let score = if is_win_score(report.score) {
        format!("mate {}", (MATE0 - report.score + 1) / 2)
    } else if is_lose_score(report.score) {
        format!("mate -{}", (MATE0 + report.score + 1) / 2)
    } else {
        format!("cp {}", report.score)
    };
    let nps = if report.time_ms > 0 {
        report.nodes * 1000 / report.time_ms
    } else {
        0
    };
    let pv: Vec<String> = report.pv.iter().map(ToString::to_string).collect();
    println!(
        "info depth {} seldepth {} multipv {} score {} nodes {} nps {} hashfull {} tbhits {} time {} pv {}",
        report.depth,
        report.seldepth,
        report.multi_pv_index + 1,
        score,
        report.nodes,
        nps,
        report.hashfull,
        report.tb_hits,
        report.time_ms,
        pv.join(" ")
    );
}

/// Blocking protocol loop over stdin.
pub fn run_uci_loop(net: Arc<NetData>) {
    let mut engine = UciEngine::new(net);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if !engine.handle_command(&line) {
            break;
        }
    }
}
