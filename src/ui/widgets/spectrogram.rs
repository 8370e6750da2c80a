// Spectrogram widget
// Paints a DisplaySnapshot onto the terminal cells

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Color,
    symbols,
    widgets::{Block, Widget},
};

use crate::display::DisplaySnapshot;

pub struct Spectrogram<'a> {
    block: Option<Block<'a>>,
    snapshot: &'a DisplaySnapshot,
    floor: f32,
    ceil: f32,
}

impl<'a> Spectrogram<'a> {
    pub fn new(snapshot: &'a DisplaySnapshot) -> Self {
        Self {
            block: None,
            snapshot,
            floor: 0.01,
            ceil: 1.0,
        }
    }

    pub fn block(mut self, block: Block<'a>) -> Self {
        self.block = Some(block);
        self
    }

    pub fn scale(mut self, floor: f32, ceil: f32) -> Self {
        self.floor = floor;
        self.ceil = ceil;
        self
    }
}

impl<'a> Widget for Spectrogram<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = self.block.unwrap_or_default();
        let inner = block.inner(area);
        block.render(area, buf);

        let cols = self.snapshot.width();
        let rows = self.snapshot.height();
        if inner.width < 1 || inner.height < 1 || cols == 0 || rows == 0 {
            return;
        }

        for x in 0..inner.width {
            let col = &self.snapshot.columns[x as usize * cols / inner.width as usize];

            for y in 0..inner.height {
                // Terminal row 0 is the top of the area; the image keeps
                // low frequencies at the bottom.
                let slot = inner.height - 1 - y;
                let lo = slot as usize * rows / inner.height as usize;
                let hi = ((slot as usize + 1) * rows / inner.height as usize).max(lo + 1);

                // A cell covers several bins; the loudest one wins so
                // narrow peaks stay visible.
                let peak = col[lo..hi.min(rows)]
                    .iter()
                    .fold(0.0f32, |a, &b| a.max(b));

                let value = log_norm(peak, self.floor, self.ceil);
                buf.get_mut(inner.left() + x, inner.top() + y)
                    .set_symbol(symbols::block::FULL)
                    .set_fg(color_for(value));
            }
        }
    }
}

/// Map a magnitude onto 0..1 through a clamped log scale. Values at or
/// below `floor` land on 0, so silence never feeds a log with zero.
pub fn log_norm(value: f32, floor: f32, ceil: f32) -> f32 {
    let clamped = value.clamp(floor, ceil);
    let norm = (clamped.log10() - floor.log10()) / (ceil.log10() - floor.log10());
    norm.clamp(0.0, 1.0)
}

/// Black through purple to white, two linear segments.
pub fn color_for(value: f32) -> Color {
    let v = value.clamp(0.0, 1.0);
    if v < 0.5 {
        let t = v * 2.0;
        Color::Rgb((127.0 * t) as u8, 0, (127.0 * t) as u8)
    } else {
        let t = (v - 0.5) * 2.0;
        Color::Rgb(
            (127.0 + 128.0 * t) as u8,
            (255.0 * t) as u8,
            (127.0 + 128.0 * t) as u8,
        )
    }
}
