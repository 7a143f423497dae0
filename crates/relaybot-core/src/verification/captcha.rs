//! Image CAPTCHA: random code, bitmap rendering, PNG encoding, distractors.
//!
//! Glyphs come from a built-in 5x7 font scaled up, so no font file ships with
//! the bot. The output is an 8-bit RGB PNG.

use image::{codecs::png::PngEncoder, ColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use rand::{seq::SliceRandom, Rng};

use crate::{errors::Error, Result};

pub const WIDTH: u32 = 200;
pub const HEIGHT: u32 = 80;
pub const CODE_LEN: usize = 4;

const NOISE_LINES: usize = 3;
const NOISE_DOTS: usize = 50;
const SCALE: u32 = 6;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const GAP: u32 = 10;
const JITTER: i32 = 4;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const NOISE: Rgb<u8> = Rgb([200, 200, 200]);

const DIGITS: &[u8] = b"0123456789";
// I and O are left out; they read as 1 and 0.
const LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const MIXED: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Alphabet a CAPTCHA code is drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptchaCharset {
    #[default]
    Digits,
    Letters,
    Mixed,
}

impl CaptchaCharset {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "digits" | "numeric" => Some(CaptchaCharset::Digits),
            "letters" | "alpha" => Some(CaptchaCharset::Letters),
            "mixed" | "alphanumeric" => Some(CaptchaCharset::Mixed),
            _ => None,
        }
    }

    fn alphabet(self) -> &'static [u8] {
        match self {
            CaptchaCharset::Digits => DIGITS,
            CaptchaCharset::Letters => LETTERS,
            CaptchaCharset::Mixed => MIXED,
        }
    }
}

/// A rendered CAPTCHA and its answer.
#[derive(Clone, Debug)]
pub struct Captcha {
    pub code: String,
    pub png: Vec<u8>,
}

pub fn random_code(charset: CaptchaCharset) -> String {
    let alphabet = charset.alphabet();
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate(charset: CaptchaCharset) -> Result<Captcha> {
    let code = random_code(charset);
    let png = render_png(&code)?;
    Ok(Captcha { code, png })
}

/// Three look-alike codes: the answer with one or two positions swapped out.
///
/// Always distinct from the answer and from each other.
pub fn distractors(answer: &str, charset: CaptchaCharset) -> Vec<String> {
    let alphabet = charset.alphabet();
    let mut rng = rand::thread_rng();
    let chars: Vec<char> = answer.chars().collect();
    let mut out: Vec<String> = Vec::with_capacity(3);

    while out.len() < 3 {
        let mut candidate = chars.clone();
        let changes = if candidate.len() > 1 { rng.gen_range(1..=2) } else { 1 };
        let mut positions: Vec<usize> = (0..candidate.len()).collect();
        positions.shuffle(&mut rng);
        for &pos in positions.iter().take(changes) {
            let original = candidate[pos];
            loop {
                let c = alphabet[rng.gen_range(0..alphabet.len())] as char;
                if c != original {
                    candidate[pos] = c;
                    break;
                }
            }
        }
        let candidate: String = candidate.into_iter().collect();
        if candidate != answer && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Draw `code` over noise and encode the image as PNG.
pub fn render_png(code: &str) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);
    let (w, h) = (WIDTH as f32, HEIGHT as f32);

    for _ in 0..NOISE_LINES {
        let from = (rng.gen_range(0.0..w), rng.gen_range(0.0..h));
        let to = (rng.gen_range(0.0..w), rng.gen_range(0.0..h));
        draw_line_segment_mut(&mut img, from, to, NOISE);
    }
    for _ in 0..NOISE_DOTS {
        img.put_pixel(rng.gen_range(0..WIDTH), rng.gen_range(0..HEIGHT), NOISE);
    }

    let color = Rgb([
        rng.gen_range(0..=100u8),
        rng.gen_range(0..=100u8),
        rng.gen_range(0..=100u8),
    ]);
    let count = code.chars().count() as u32;
    let glyph_w = GLYPH_W * SCALE;
    let glyph_h = GLYPH_H * SCALE;
    let text_w = count * glyph_w + count.saturating_sub(1) * GAP;
    let left = (WIDTH.saturating_sub(text_w) / 2) as i32;
    let top = (HEIGHT.saturating_sub(glyph_h) / 2) as i32;

    for (i, ch) in code.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let x = left + (i as u32 * (glyph_w + GAP)) as i32;
        let y = top + rng.gen_range(-JITTER..=JITTER);
        draw_glyph(&mut img, &rows, x, y, color);
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), WIDTH, HEIGHT, ColorType::Rgb8)
        .map_err(|e| Error::External(format!("captcha encoding failed: {e}")))?;
    Ok(png)
}

/// Each set bit of the 5x7 cell becomes a `SCALE`-sized square.
fn draw_glyph(img: &mut RgbImage, rows: &[u8; 7], left: i32, top: i32, color: Rgb<u8>) {
    for (gy, bits) in rows.iter().enumerate() {
        for gx in 0..GLYPH_W {
            if bits & (1 << (GLYPH_W - 1 - gx)) == 0 {
                continue;
            }
            let cell = Rect::at(left + (gx * SCALE) as i32, top + (gy as u32 * SCALE) as i32)
                .of_size(SCALE, SCALE);
            draw_filled_rect_mut(img, cell, color);
        }
    }
}

fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        _ => return None,
    };
    Some(rows)
}
