//! Turns detector output into a FEN-style position.
//!
//! The image is cut into an 8x8 grid; row 0 is the top of the photo and is
//! read as rank 8, column 0 is the left edge and is read as the a-file.

use shakmaty::{Color, Piece};

use crate::types::{Detections, Position};

type Grid = [[Option<Piece>; 8]; 8];

/// Place every detected piece on the grid cell containing its centre.
///
/// Cells are clamped to `0..=7` so jitter at the image border still lands on
/// the board. Two detections in the same cell: the later one wins.
pub fn encode(detections: &Detections, side_to_move: Color) -> Position {
    let cell_w = detections.width as f32 / 8.0;
    let cell_h = detections.height as f32 / 8.0;

    let mut grid: Grid = [[None; 8]; 8];
    for piece in &detections.pieces {
        let col = cell_index(piece.center_x, cell_w);
        let row = cell_index(piece.center_y, cell_h);
        grid[row][col] = Some(piece.label);
    }

    Position {
        placement: placement(&grid),
        side_to_move,
    }
}

fn cell_index(coord: f32, cell: f32) -> usize {
    if cell.is_nan() || cell <= 0.0 || !coord.is_finite() {
        return 0;
    }
    // `as` saturates, so negative coordinates end up in cell 0
    ((coord / cell).floor() as usize).min(7)
}

fn placement(grid: &Grid) -> String {
    let mut rows = Vec::with_capacity(8);
    for row in grid {
        let mut token = String::new();
        let mut empty = 0;
        for cell in row {
            match cell {
                Some(piece) => {
                    if empty > 0 {
                        token.push_str(&empty.to_string());
                        empty = 0;
                    }
                    token.push(piece.char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            token.push_str(&empty.to_string());
        }
        rows.push(token);
    }
    rows.join("/")
}

/// Read the side-to-move hint sent with an upload.
///
/// Accepts `white`/`black` in any case as well as `w`/`b`. Anything else,
/// including a missing hint, is White.
pub fn parse_side(hint: Option<&str>) -> Color {
    match hint.map(|h| h.trim().to_ascii_lowercase()).as_deref() {
        Some("black") | Some("b") => Color::Black,
        _ => Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectedPiece;

    fn piece(c: char, x: f32, y: f32) -> DetectedPiece {
        DetectedPiece {
            label: Piece::from_char(c).unwrap(),
            center_x: x,
            center_y: y,
        }
    }

    fn detections(pieces: Vec<DetectedPiece>) -> Detections {
        Detections {
            width: 800,
            height: 800,
            pieces,
        }
    }

    fn expanded_width(token: &str) -> u32 {
        token
            .chars()
            .map(|c| c.to_digit(10).unwrap_or(1))
            .sum()
    }

    #[test]
    fn empty_detection_is_empty_board() {
        let position = encode(&detections(vec![]), Color::White);
        assert_eq!(position.placement, "8/8/8/8/8/8/8/8");
        assert_eq!(position.fen(), "8/8/8/8/8/8/8/8 w - - 0 1");
    }

    #[test]
    fn top_row_of_image_is_rank_eight() {
        // a2 pawn, e1 king, e8 king on an 800x800 photo
        let position = encode(
            &detections(vec![
                piece('P', 50.0, 650.0),
                piece('K', 450.0, 750.0),
                piece('k', 450.0, 50.0),
            ]),
            Color::White,
        );
        assert_eq!(position.placement, "4k3/8/8/8/8/8/P7/4K3");
        assert_eq!(position.fen(), "4k3/8/8/8/8/8/P7/4K3 w - - 0 1");
    }

    #[test]
    fn every_rank_expands_to_eight_cells() {
        let position = encode(
            &detections(vec![
                piece('r', 10.0, 10.0),
                piece('q', 350.0, 120.0),
                piece('N', 799.0, 799.0),
                piece('p', 260.0, 420.0),
                piece('B', 640.0, 420.0),
            ]),
            Color::Black,
        );
        let ranks: Vec<&str> = position.placement.split('/').collect();
        assert_eq!(ranks.len(), 8);
        for rank in ranks {
            assert_eq!(expanded_width(rank), 8, "rank token {rank}");
        }
    }

    #[test]
    fn out_of_frame_centres_are_clamped() {
        let position = encode(
            &detections(vec![piece('Q', 1200.0, -40.0), piece('n', -5.0, 900.0)]),
            Color::White,
        );
        assert_eq!(position.placement, "7Q/8/8/8/8/8/8/n7");
    }

    #[test]
    fn later_detection_overwrites_cell() {
        let position = encode(
            &detections(vec![piece('P', 20.0, 20.0), piece('R', 30.0, 30.0)]),
            Color::White,
        );
        assert_eq!(position.placement, "R7/8/8/8/8/8/8/8");
    }

    #[test]
    fn zero_sized_image_still_encodes() {
        let position = encode(
            &Detections {
                width: 0,
                height: 0,
                pieces: vec![piece('k', 3.0, 3.0)],
            },
            Color::White,
        );
        assert_eq!(position.placement, "k7/8/8/8/8/8/8/8");
    }

    #[test]
    fn side_hint_parsing() {
        assert_eq!(parse_side(Some("Black")), Color::Black);
        assert_eq!(parse_side(Some("b")), Color::Black);
        assert_eq!(parse_side(Some("White")), Color::White);
        assert_eq!(parse_side(Some("purple")), Color::White);
        assert_eq!(parse_side(None), Color::White);
    }
}
