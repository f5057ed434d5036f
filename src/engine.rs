//! Move search adapter backed by a UCI engine process.
//!
//! An [`EnginePool`] hands out [`EngineLease`]s. Each lease owns its own
//! engine process for the lifetime of one analysis request and must not be
//! shared; the pool's semaphore bounds how many processes run at once.
//! Releasing a lease sends `quit`; dropping it kills the process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::{CandidateMove, Score};

/// Something that can list the engine's preferred lines for a position.
#[async_trait]
pub trait MoveSearch: Send {
    /// Search `fen` after playing `moves` (UCI notation) to a fixed `depth`
    /// and return at most `top_n` lines, best first.
    async fn search(
        &mut self,
        fen: &str,
        moves: &[String],
        depth: u8,
        top_n: usize,
    ) -> Result<Vec<CandidateMove>, EngineError>;

    /// Give the underlying resources back. Called once per lease.
    async fn release(self: Box<Self>) -> Result<(), EngineError>;
}

/// Hands out exclusive [`MoveSearch`] handles, one per request.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MoveSearch>, EngineError>;
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub path: String,
    /// Extra command-line arguments for the engine binary.
    pub args: Vec<String>,
    pub max_processes: usize,
    pub search_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            path: "stockfish".to_string(),
            args: Vec::new(),
            max_processes: 2,
            search_timeout: Duration::from_secs(30),
        }
    }
}

/// Bounded pool of engine processes.
#[derive(Clone)]
pub struct EnginePool {
    settings: EngineSettings,
    permits: Arc<Semaphore>,
}

impl EnginePool {
    pub fn new(settings: EngineSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_processes.max(1)));
        Self { settings, permits }
    }

    /// Wait for a free slot and start a fresh engine in it.
    pub async fn lease(&self) -> Result<EngineLease, EngineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        let engine = UciEngine::spawn(
            &self.settings.path,
            &self.settings.args,
            self.settings.search_timeout,
        )
        .await?;
        Ok(EngineLease {
            engine,
            _permit: permit,
        })
    }
}

#[async_trait]
impl SearchProvider for EnginePool {
    async fn acquire(&self) -> Result<Box<dyn MoveSearch>, EngineError> {
        Ok(Box::new(self.lease().await?))
    }
}

/// Exclusive use of one engine process. The pool slot frees when this drops.
pub struct EngineLease {
    engine: UciEngine,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl MoveSearch for EngineLease {
    async fn search(
        &mut self,
        fen: &str,
        moves: &[String],
        depth: u8,
        top_n: usize,
    ) -> Result<Vec<CandidateMove>, EngineError> {
        self.engine.analyse(fen, moves, depth, top_n).await
    }

    async fn release(self: Box<Self>) -> Result<(), EngineError> {
        let EngineLease { engine, _permit } = *self;
        engine.quit().await
    }
}

/// A running UCI engine.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    timeout: Duration,
}

impl UciEngine {
    /// Start the engine binary and complete the `uci`/`isready` handshake.
    pub async fn spawn(
        path: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: path.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout unavailable".to_string()))?;

        let mut engine = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            timeout,
        };

        engine.send("uci").await?;
        within(timeout, engine.wait_for("uciok")).await?;
        engine.ready().await?;
        debug!(path, "engine started");
        Ok(engine)
    }

    /// MultiPV search to a fixed depth.
    pub async fn analyse(
        &mut self,
        fen: &str,
        moves: &[String],
        depth: u8,
        top_n: usize,
    ) -> Result<Vec<CandidateMove>, EngineError> {
        let top_n = top_n.max(1);
        self.send(&format!("setoption name MultiPV value {top_n}"))
            .await?;
        self.ready().await?;

        let mut position = format!("position fen {fen}");
        if !moves.is_empty() {
            position.push_str(" moves ");
            position.push_str(&moves.join(" "));
        }
        self.send(&position).await?;
        self.send(&format!("go depth {depth}")).await?;

        within(self.timeout, self.collect_lines(top_n)).await
    }

    /// Ask the engine to exit and reap it; kill it if it lingers.
    pub async fn quit(mut self) -> Result<(), EngineError> {
        if let Err(err) = self.send("quit").await {
            warn!(%err, "engine did not accept quit");
        }
        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(status) => {
                debug!(?status, "engine exited");
                Ok(())
            }
            Err(_) => {
                warn!("engine ignored quit, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }

    async fn ready(&mut self) -> Result<(), EngineError> {
        self.send("isready").await?;
        within(self.timeout, self.wait_for("readyok")).await
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        debug!(command, "to engine");
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        self.lines.next_line().await?.ok_or(EngineError::Exited)
    }

    async fn wait_for(&mut self, token: &str) -> Result<(), EngineError> {
        loop {
            if self.next_line().await?.trim() == token {
                return Ok(());
            }
        }
    }

    async fn collect_lines(&mut self, top_n: usize) -> Result<Vec<CandidateMove>, EngineError> {
        let mut slots: Vec<Option<(u32, CandidateMove)>> = vec![None; top_n];
        loop {
            let line = self.next_line().await?;
            if line.starts_with("bestmove") {
                break;
            }
            let Some(info) = parse_info(&line) else {
                continue;
            };
            if info.multipv == 0 || info.multipv > top_n {
                continue;
            }
            let slot = &mut slots[info.multipv - 1];
            if slot.as_ref().is_none_or(|(depth, _)| info.depth >= *depth) {
                *slot = Some((info.depth, info.line));
            }
        }
        // stop at the first gap: fewer legal lines than requested
        Ok(slots
            .into_iter()
            .map_while(|slot| slot.map(|(_, line)| line))
            .collect())
    }
}

async fn within<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| EngineError::Timeout(limit))?
}

/// A parsed `info` line that carries a principal variation.
#[derive(Debug, Clone, PartialEq)]
struct InfoLine {
    depth: u32,
    multipv: usize,
    line: CandidateMove,
}

/// Parse `info depth .. multipv .. score cp|mate .. pv ..`.
///
/// Lines without a score or pv (currmove updates, strings) yield `None`.
/// Lower/upper bound scores are skipped since they are not final.
fn parse_info(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }

    let mut depth = 0;
    let mut multipv = 1;
    let mut score = None;
    let mut pv = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "depth" => depth = tokens.next()?.parse().ok()?,
            "multipv" => multipv = tokens.next()?.parse().ok()?,
            "score" => {
                let kind = tokens.next()?;
                let value: i32 = tokens.next()?.parse().ok()?;
                score = match kind {
                    "cp" => Some(Score::Centipawns(value)),
                    "mate" => Some(Score::Mate(value)),
                    _ => None,
                };
            }
            "lowerbound" | "upperbound" => return None,
            "pv" => {
                pv = tokens.by_ref().map(str::to_string).collect();
            }
            _ => {}
        }
    }

    let score = score?;
    let first = pv.first()?.clone();
    Some(InfoLine {
        depth,
        multipv,
        line: CandidateMove {
            uci: first,
            pv,
            score,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multipv_info_line() {
        let line = "info depth 20 seldepth 28 multipv 2 score cp -35 nodes 123456 nps 900000 time 130 pv e7e5 g1f3 b8c6";
        let info = parse_info(line).unwrap();
        assert_eq!(info.depth, 20);
        assert_eq!(info.multipv, 2);
        assert_eq!(info.line.uci, "e7e5");
        assert_eq!(info.line.pv, vec!["e7e5", "g1f3", "b8c6"]);
        assert_eq!(info.line.score, Score::Centipawns(-35));
    }

    #[test]
    fn parses_mate_score() {
        let info = parse_info("info depth 9 score mate -3 pv h7h8q").unwrap();
        assert_eq!(info.multipv, 1);
        assert_eq!(info.line.score, Score::Mate(-3));
    }

    const SCRIPTED: &str = r#"while read -r cmd rest; do
  case "$cmd" in
    uci) echo "id name scripted"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go)
      echo "info depth 4 multipv 1 score cp 3 pv g1f3"
      echo "info depth 9 multipv 1 score cp 12 pv e2e4 e7e5"
      echo "info depth 9 multipv 2 score mate 3 pv d2d4 d7d5 c2c4"
      echo "info depth 2 multipv 1 score cp -50 pv a2a3"
      echo "bestmove e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;

    const SILENT_SEARCH: &str = r#"while read -r cmd rest; do
  case "$cmd" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    quit) exit 0 ;;
  esac
done
"#;

    const FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    /// Pool of one `sh` process running `script` as a UCI engine.
    fn scripted_pool(script: &str, search_timeout: Duration) -> (EnginePool, std::path::PathBuf) {
        let path =
            std::env::temp_dir().join(format!("chess-vision-uci-{}.sh", uuid::Uuid::new_v4()));
        std::fs::write(&path, script).unwrap();
        let pool = EnginePool::new(EngineSettings {
            path: "/bin/sh".to_string(),
            args: vec![path.display().to_string()],
            max_processes: 1,
            search_timeout,
        });
        (pool, path)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn search_returns_deepest_line_per_slot_and_stops_at_gap() {
        let (pool, script) = scripted_pool(SCRIPTED, Duration::from_secs(5));

        let mut lease = pool.acquire().await.unwrap();
        let lines = lease.search(FEN, &[], 12, 3).await.unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            CandidateMove {
                uci: "e2e4".to_string(),
                pv: vec!["e2e4".to_string(), "e7e5".to_string()],
                score: Score::Centipawns(12),
            }
        );
        assert_eq!(lines[1].uci, "d2d4");
        assert_eq!(lines[1].pv.len(), 3);
        assert_eq!(lines[1].score, Score::Mate(3));

        // the only slot is taken until the lease is released
        assert!(
            tokio::time::timeout(Duration::from_millis(200), pool.acquire())
                .await
                .is_err()
        );
        lease.release().await.unwrap();

        let again = tokio::time::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        again.release().await.unwrap();

        let _ = std::fs::remove_file(script);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn search_without_bestmove_times_out() {
        let (pool, script) = scripted_pool(SILENT_SEARCH, Duration::from_millis(500));

        let mut lease = pool.acquire().await.unwrap();
        let err = lease.search(FEN, &[], 12, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(limit) if limit == Duration::from_millis(500)));

        // dropping the lease kills the process and frees the slot
        drop(lease);
        let again = tokio::time::timeout(Duration::from_secs(5), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        again.release().await.unwrap();

        let _ = std::fs::remove_file(script);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let pool = EnginePool::new(EngineSettings {
            path: "/nonexistent/chess-engine".to_string(),
            ..Default::default()
        });
        let err = pool.lease().await.err().unwrap();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[test]
    fn skips_lines_without_a_line() {
        assert!(parse_info("info depth 12 currmove e2e4 currmovenumber 1").is_none());
        assert!(parse_info("info string NNUE evaluation enabled").is_none());
        assert!(parse_info("bestmove e2e4 ponder e7e5").is_none());
        assert!(parse_info("info depth 3 score cp 20 lowerbound pv e2e4").is_none());
    }
}
