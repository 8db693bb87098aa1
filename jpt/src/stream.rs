// Positioned big-endian byte I/O over any seekable reader or writer.
//
// Markers and marker segment parameters are big-endian (A.1.1); everything
// the indexer and writers touch goes through these traits.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::marker::MarkerSymbol;

pub trait Stream: Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn skip(&mut self, count: i64) -> io::Result<u64> {
        self.seek(SeekFrom::Current(count))
    }

    /// Total length of the stream; the position is left unchanged.
    fn stream_length(&mut self) -> io::Result<u64> {
        let position = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(position))?;
        Ok(end)
    }
}

impl<T: Seek + ?Sized> Stream for T {}

pub trait StreamRead: Stream + Read {
    fn read_u8(&mut self) -> io::Result<u8> {
        ReadBytesExt::read_u8(self)
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        ReadBytesExt::read_u16::<BigEndian>(self)
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        ReadBytesExt::read_u32::<BigEndian>(self)
    }

    fn read_marker(&mut self) -> io::Result<MarkerSymbol> {
        let mut marker: MarkerSymbol = [0; 2];
        self.read_exact(&mut marker)?;
        Ok(marker)
    }
}

impl<T: Read + Seek + ?Sized> StreamRead for T {}

pub trait StreamWrite: Stream + Write {
    fn write_u8(&mut self, value: u8) -> io::Result<()> {
        WriteBytesExt::write_u8(self, value)
    }

    fn write_u16(&mut self, value: u16) -> io::Result<()> {
        WriteBytesExt::write_u16::<BigEndian>(self, value)
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        WriteBytesExt::write_u32::<BigEndian>(self, value)
    }

    fn write_marker(&mut self, marker: MarkerSymbol) -> io::Result<()> {
        self.write_all(&marker)
    }

    fn write_zeros(&mut self, count: usize) -> io::Result<()> {
        io::copy(&mut io::repeat(0).take(count as u64), self)?;
        Ok(())
    }
}

impl<T: Write + Seek + ?Sized> StreamWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_big_endian_round_trip_and_positions() {
        let mut cursor = Cursor::new(Vec::new());
        StreamWrite::write_u16(&mut cursor, 0xFF90).unwrap();
        StreamWrite::write_u32(&mut cursor, 0x0102_0304).unwrap();
        cursor.write_zeros(3).unwrap();
        assert_eq!(cursor.tell().unwrap(), 9);
        assert_eq!(cursor.get_ref()[..6], [0xFF, 0x90, 1, 2, 3, 4]);

        cursor.seek_to(0).unwrap();
        assert_eq!(cursor.read_marker().unwrap(), [0xFF, 0x90]);
        assert_eq!(StreamRead::read_u32(&mut cursor).unwrap(), 0x0102_0304);
        assert_eq!(cursor.stream_length().unwrap(), 9);
        assert_eq!(cursor.tell().unwrap(), 6);
        assert_eq!(cursor.skip(2).unwrap(), 8);
    }
}
