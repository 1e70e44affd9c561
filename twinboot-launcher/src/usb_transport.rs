// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC transport with COBS-framed postcard serialization.

use rp2040_hal::usb::UsbBus;
use twinboot_common::protocol::{Command, Frame, FrameAccumulator, Response, MAX_FRAME_SIZE};
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

pub struct UsbTransport {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    frames: FrameAccumulator<MAX_FRAME_SIZE>,
    /// Last USB read; bytes past a delimiter wait here for the next call.
    chunk: [u8; 64],
    chunk_len: usize,
    chunk_pos: usize,
}

impl UsbTransport {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A))
            .strings(&[StringDescriptors::default()
                .manufacturer("ADNT")
                .product("Twinboot Launcher")
                .serial_number("0001")])
            .expect("single string descriptor set")
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        Self {
            serial,
            usb_dev,
            frames: FrameAccumulator::new(),
            chunk: [0u8; 64],
            chunk_len: 0,
            chunk_pos: 0,
        }
    }

    /// Poll USB device. Must be called frequently.
    pub fn poll(&mut self) -> bool {
        self.usb_dev.poll(&mut [&mut self.serial])
    }

    /// Try to receive a complete COBS-framed command.
    ///
    /// `Some(Err(()))` means a frame arrived but did not decode; the caller
    /// answers it with `BadCommand`.
    pub fn try_receive(&mut self) -> Option<Result<Command, ()>> {
        if self.chunk_pos == self.chunk_len {
            self.chunk_len = self.serial.read(&mut self.chunk).unwrap_or(0);
            self.chunk_pos = 0;
        }

        let mut input = &self.chunk[self.chunk_pos..self.chunk_len];
        let frame = self.frames.feed(&mut input);
        self.chunk_pos = self.chunk_len - input.len();

        match frame? {
            Frame::Complete(bytes) => {
                Some(postcard::from_bytes_cobs::<Command>(bytes).map_err(|_| ()))
            }
            Frame::Oversized => Some(Err(())),
        }
    }

    /// Send a response as a COBS-framed postcard message.
    pub fn send(&mut self, resp: &Response) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let Ok(encoded) = postcard::to_slice_cobs(resp, &mut buf) else {
            defmt::println!("response does not fit a frame");
            return;
        };

        let mut offset = 0;
        while offset < encoded.len() {
            match self.serial.write(&encoded[offset..]) {
                Ok(n) => offset += n,
                Err(UsbError::WouldBlock) => {
                    self.poll();
                }
                Err(_) => break,
            }
        }
    }
}
