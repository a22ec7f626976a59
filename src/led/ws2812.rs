//! WS2812 strip driven from the SPI MOSI line
//!
//! At 6.4 MHz one SPI byte lasts 1.25 us, which is one WS2812 bit slot. A `0` bit is sent
//! as two high SPI bits (~310 ns high), a `1` bit as five (~780 ns high). A run of zero
//! bytes after the frame latches the colors.

use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::info;

use super::{LedError, PixelStrip, Rgb};

const SPI_CLOCK_HZ: u32 = 6_400_000;
const BIT_ZERO: u8 = 0b1100_0000;
const BIT_ONE: u8 = 0b1111_1000;
// >280 us low at 6.4 MHz
const RESET_BYTES: usize = 240;

pub struct Ws2812Spi {
    spi: Spi,
    pixels: Vec<Rgb>,
    brightness: u8,
}

impl Ws2812Spi {
    pub fn new(bus: u8, len: usize, brightness: u8) -> Result<Self, LedError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(LedError::UnsupportedBus(other)),
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;
        info!("WS2812 strip with {} pixels on {:?}", len, bus);
        Ok(Self {
            spi,
            pixels: vec![Rgb::OFF; len],
            brightness,
        })
    }
}

impl PixelStrip for Ws2812Spi {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    fn flush(&mut self) -> Result<(), LedError> {
        let frame = encode_frame(&self.pixels, self.brightness);
        self.spi.write(&frame)?;
        Ok(())
    }
}

/// Encodes pixels in GRB order, eight SPI bytes per color byte, followed by the latch.
pub fn encode_frame(pixels: &[Rgb], brightness: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pixels.len() * 24 + RESET_BYTES);
    for &Rgb(r, g, b) in pixels {
        for channel in [g, r, b] {
            let value = scale(channel, brightness);
            for bit in (0..8).rev() {
                frame.push(if value & (1 << bit) != 0 {
                    BIT_ONE
                } else {
                    BIT_ZERO
                });
            }
        }
    }
    frame.resize(frame.len() + RESET_BYTES, 0);
    frame
}

fn scale(value: u8, brightness: u8) -> u8 {
    ((value as u16 * brightness as u16) / 255) as u8
}
