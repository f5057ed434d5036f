//! SVG board diagrams with the last move highlighted.

use std::fmt::Write as _;

use shakmaty::{Board, Color, Move, Role, Square};

const SQUARE: u32 = 45;
const MARGIN: u32 = 15;
const LIGHT: &str = "#ffce9e";
const DARK: &str = "#d18b47";
const LIGHT_LASTMOVE: &str = "#cdd16a";
const DARK_LASTMOVE: &str = "#aaa23b";
const ARROW: &str = "#15781b";

/// Render `board` from White's side. `highlight` marks the move's squares and
/// draws an arrow from origin to destination.
pub fn render(board: &Board, highlight: Option<&Move>) -> String {
    let size = SQUARE * 8 + MARGIN * 2;
    let (from, to) = match highlight {
        Some(m) => (m.from(), Some(m.to())),
        None => (None, None),
    };

    let mut svg = String::with_capacity(16 * 1024);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}">"#
    );
    let _ = write!(svg, r##"<rect width="{size}" height="{size}" fill="#212121"/>"##);

    for sq in Square::ALL {
        let (x, y) = origin(sq);
        let light = (sq.rank() as u32 + sq.file() as u32) % 2 == 1;
        let marked = Some(sq) == from || Some(sq) == to;
        let fill = match (light, marked) {
            (true, false) => LIGHT,
            (false, false) => DARK,
            (true, true) => LIGHT_LASTMOVE,
            (false, true) => DARK_LASTMOVE,
        };
        let _ = write!(
            svg,
            r#"<rect x="{x}" y="{y}" width="{SQUARE}" height="{SQUARE}" fill="{fill}"/>"#
        );

        if let Some(piece) = board.piece_at(sq) {
            let (fill, stroke) = match piece.color {
                Color::White => ("#ffffff", "#000000"),
                Color::Black => ("#000000", "#ffffff"),
            };
            let _ = write!(
                svg,
                r#"<text x="{cx}" y="{cy}" font-size="36" text-anchor="middle" dominant-baseline="central" fill="{fill}" stroke="{stroke}" stroke-width="0.8">{glyph}</text>"#,
                cx = x + SQUARE / 2,
                cy = y + SQUARE / 2,
                glyph = glyph(piece.role),
            );
        }
    }

    coordinates(&mut svg);

    if let (Some(from), Some(to)) = (from, to) {
        arrow(&mut svg, from, to);
    }

    svg.push_str("</svg>");
    svg
}

/// Top-left corner of a square; rank 8 is at the top.
fn origin(sq: Square) -> (u32, u32) {
    let file = sq.file() as u32;
    let rank = sq.rank() as u32;
    (MARGIN + file * SQUARE, MARGIN + (7 - rank) * SQUARE)
}

fn glyph(role: Role) -> char {
    match role {
        Role::King => '\u{265A}',
        Role::Queen => '\u{265B}',
        Role::Rook => '\u{265C}',
        Role::Bishop => '\u{265D}',
        Role::Knight => '\u{265E}',
        Role::Pawn => '\u{265F}',
    }
}

fn coordinates(svg: &mut String) {
    for (i, file) in ('a'..='h').enumerate() {
        let x = MARGIN + i as u32 * SQUARE + SQUARE / 2;
        let y = MARGIN * 2 + SQUARE * 8 - 3;
        let _ = write!(
            svg,
            r##"<text x="{x}" y="{y}" font-size="11" text-anchor="middle" fill="#e5e5e5">{file}</text>"##
        );
    }
    for rank in 1..=8u32 {
        let y = MARGIN + (8 - rank) * SQUARE + SQUARE / 2;
        let _ = write!(
            svg,
            r##"<text x="{x}" y="{y}" font-size="11" text-anchor="middle" dominant-baseline="central" fill="#e5e5e5">{rank}</text>"##,
            x = MARGIN / 2,
        );
    }
}

fn arrow(svg: &mut String, from: Square, to: Square) {
    let center = |sq| {
        let (x, y) = origin(sq);
        ((x + SQUARE / 2) as f32, (y + SQUARE / 2) as f32)
    };
    let (x1, y1) = center(from);
    let (x2, y2) = center(to);

    let (dx, dy) = (x2 - x1, y2 - y1);
    let len = (dx * dx + dy * dy).sqrt().max(1.0);
    let (ux, uy) = (dx / len, dy / len);
    let head = SQUARE as f32 * 0.4;
    // shaft stops where the head begins
    let (sx, sy) = (x2 - ux * head, y2 - uy * head);
    let (px, py) = (-uy * head * 0.5, ux * head * 0.5);

    let _ = write!(
        svg,
        r#"<line x1="{x1}" y1="{y1}" x2="{sx}" y2="{sy}" stroke="{ARROW}" stroke-width="9" stroke-linecap="round" opacity="0.8"/>"#
    );
    let _ = write!(
        svg,
        r#"<polygon points="{x2},{y2} {ax},{ay} {bx},{by}" fill="{ARROW}" opacity="0.8"/>"#,
        ax = sx + px,
        ay = sy + py,
        bx = sx - px,
        by = sy - py,
    );
}
