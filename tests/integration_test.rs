use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tempfile::NamedTempFile;

use xisfio::document::{Document, Image, ImageData, Property, PropertyValue, VectorValue};
use xisfio::io_stream::{ReadOptions, WriteOptions, XisfReader, XisfWriter};
use xisfio::layout::{BLOCK_ALIGNMENT, SIGNATURE};
use xisfio::{ChecksumAlgorithm, CodecId, SampleFormat, XisfError};

fn gradient(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// xorshift64 byte stream: incompressible, so payloads stay above the
// inline threshold and land in the attachment area.
fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

#[test]
fn test_write_and_read_minimal_image() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let file = File::create(&path).unwrap();
        let mut document = Document::new();
        document
            .images
            .push(Image::new(vec![3, 1], 1, SampleFormat::UInt8, vec![1, 2, 3]).unwrap());
        let options = WriteOptions {
            codec: CodecId::Zstd,
            shuffle: false,
            checksum: Some(ChecksumAlgorithm::Sha256),
            ..WriteOptions::default()
        };
        let mut writer = XisfWriter::with_options(file, options);
        writer.write_document(&document).unwrap();
    }

    {
        let file = File::open(&path).unwrap();
        let mut reader = XisfReader::open(file).unwrap();
        assert_eq!(reader.document.images.len(), 1);
        assert_eq!(reader.document.images[0].geometry, vec![3, 1]);
        assert_eq!(reader.image_data(0).unwrap(), vec![1, 2, 3]);
    }
}

#[test]
fn test_signature_and_alignment_on_disk() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let data = noise(256 * 256 * 2);
    {
        let file = File::create(&path).unwrap();
        let mut document = Document::new();
        document
            .images
            .push(Image::new(vec![256, 256], 1, SampleFormat::UInt16, data.clone()).unwrap());
        let mut writer = XisfWriter::with_options(
            file,
            WriteOptions { checksum: Some(ChecksumAlgorithm::Sha256), ..WriteOptions::default() },
        );
        writer.write_document(&document).unwrap();
    }

    {
        let mut file = File::open(&path).unwrap();
        let mut prefix = [0u8; 16];
        file.read_exact(&mut prefix).unwrap();
        assert_eq!(&prefix[..8], SIGNATURE);
        let header_len = u32::from_le_bytes(prefix[8..12].try_into().unwrap());
        assert!(header_len > 0);
        assert_eq!(&prefix[12..16], &[0u8; 4]);

        // The attachment area begins on an alignment boundary past the header.
        let mut reader = XisfReader::open(File::open(&path).unwrap()).unwrap();
        match &reader.document.images[0].data {
            ImageData::Block(block) => match block.location {
                xisfio::grammar::Location::Attachment { position, .. } => {
                    assert_eq!(position % BLOCK_ALIGNMENT, 0);
                    assert!(position >= (16 + header_len as u64));
                }
                _ => panic!("expected an attachment"),
            },
            ImageData::Raw(_) => panic!("expected a lazy block"),
        }
        assert_eq!(reader.image_data(0).unwrap(), data);
    }
}

#[test]
fn test_multi_image_offsets_do_not_overlap() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let payloads: Vec<Vec<u8>> =
        vec![gradient(5000), gradient(40_000), gradient(12_345), gradient(65_536)];
    {
        let file = File::create(&path).unwrap();
        let mut document = Document::new();
        for data in &payloads {
            document
                .images
                .push(Image::new(vec![data.len()], 1, SampleFormat::UInt8, data.clone()).unwrap());
        }
        // Uncompressed so every payload lands as its own attachment.
        let mut writer = XisfWriter::with_options(
            file,
            WriteOptions { codec: CodecId::None, ..WriteOptions::default() },
        );
        writer.write_document(&document).unwrap();
    }

    {
        let mut reader = XisfReader::open(File::open(&path).unwrap()).unwrap();
        let mut regions: Vec<(u64, u64)> = Vec::new();
        for image in &reader.document.images {
            match &image.data {
                ImageData::Block(block) => match block.location {
                    xisfio::grammar::Location::Attachment { position, size } => {
                        assert_eq!(position % BLOCK_ALIGNMENT, 0);
                        regions.push((position, size));
                    }
                    _ => panic!("expected an attachment"),
                },
                ImageData::Raw(_) => panic!("expected a lazy block"),
            }
        }
        regions.sort();
        for pair in regions.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "attachments overlap: {pair:?}");
        }
        for (i, data) in payloads.iter().enumerate() {
            assert_eq!(&reader.image_data(i).unwrap(), data);
        }
    }
}

#[test]
fn test_shuffled_compression_roundtrip_through_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    // Smooth 16-bit ramp: the classic case where byte shuffling pays off.
    let samples: Vec<u8> = (0..32_768u32)
        .flat_map(|i| ((i % 65_536) as u16).to_le_bytes())
        .collect();
    {
        let file = File::create(&path).unwrap();
        let mut document = Document::new();
        document
            .images
            .push(Image::new(vec![256, 128], 1, SampleFormat::UInt16, samples.clone()).unwrap());
        let mut writer = XisfWriter::with_options(
            file,
            WriteOptions {
                codec: CodecId::Lz4,
                shuffle: true,
                checksum: Some(ChecksumAlgorithm::Sha512),
                ..WriteOptions::default()
            },
        );
        writer.write_document(&document).unwrap();
    }

    {
        let mut reader =
            XisfReader::with_options(File::open(&path).unwrap(), ReadOptions { strict: true })
                .unwrap();
        match &reader.document.images[0].data {
            ImageData::Block(block) => {
                let info = block.compression.as_ref().unwrap();
                assert!(info.needs_unshuffle());
                assert_eq!(info.item_size, 2);
            }
            ImageData::Raw(_) => panic!("expected a lazy block"),
        }
        assert_eq!(reader.image_data(0).unwrap(), samples);
    }
}

#[test]
fn test_corrupted_attachment_is_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let file = File::create(&path).unwrap();
        let mut document = Document::new();
        document
            .images
            .push(Image::new(vec![30_000], 1, SampleFormat::UInt8, noise(30_000)).unwrap());
        let mut writer = XisfWriter::with_options(
            file,
            WriteOptions { checksum: Some(ChecksumAlgorithm::Sha256), ..WriteOptions::default() },
        );
        writer.write_document(&document).unwrap();
    }

    // Flip one bit in the middle of the attachment area.
    {
        let mut file = File::options().read(true).write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.seek(SeekFrom::Start(len - 100)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0x80;
        file.seek(SeekFrom::Start(len - 100)).unwrap();
        std::io::Write::write_all(&mut file, &byte).unwrap();
    }

    {
        let mut reader = XisfReader::open(File::open(&path).unwrap()).unwrap();
        match &reader.document.images[0].data {
            ImageData::Block(block) => {
                assert!(matches!(
                    block.location,
                    xisfio::grammar::Location::Attachment { .. }
                ));
            }
            ImageData::Raw(_) => panic!("expected a lazy block"),
        }
        let err = reader.image_data(0).unwrap_err();
        assert!(matches!(err, XisfError::Checksum { .. }));
    }
}

#[test]
fn test_thumbnail_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let full = gradient(64 * 64);
    let thumb = gradient(8 * 8);
    {
        let file = File::create(&path).unwrap();
        let mut image = Image::new(vec![64, 64], 1, SampleFormat::UInt8, full.clone()).unwrap();
        image.thumbnail =
            Some(Box::new(Image::new(vec![8, 8], 1, SampleFormat::UInt8, thumb.clone()).unwrap()));
        let mut document = Document::new();
        document.images.push(image);
        XisfWriter::new(file).write_document(&document).unwrap();
    }

    {
        let mut reader = XisfReader::open(File::open(&path).unwrap()).unwrap();
        assert!(reader.document.images[0].thumbnail.is_some());
        assert_eq!(reader.image_data(0).unwrap(), full);
        assert_eq!(reader.thumbnail_data(0).unwrap(), thumb);
    }
}

#[test]
fn test_full_document_survives_rewrite() {
    let first = NamedTempFile::new().unwrap();
    let second = NamedTempFile::new().unwrap();

    let data = gradient(10_000);
    {
        let mut document = Document::new();
        let mut image =
            Image::new(vec![100, 100], 1, SampleFormat::UInt8, data.clone()).unwrap();
        image
            .properties
            .insert(Property::new("Instrument:Gain", PropertyValue::Float32(1.5)).unwrap())
            .unwrap();
        document.images.push(image);
        document
            .properties
            .insert(
                Property::new(
                    "Calibration:Dark",
                    PropertyValue::Vector(VectorValue::I32((0..2000).collect())),
                )
                .unwrap(),
            )
            .unwrap();
        XisfWriter::new(File::create(first.path()).unwrap())
            .write_document(&document)
            .unwrap();
    }

    // Read everything back, materialize it, and write a second container.
    {
        let mut reader = XisfReader::open(File::open(first.path()).unwrap()).unwrap();
        let pixels = reader.image_data(0).unwrap();
        let gain = reader.image_property_value(0, "Instrument:Gain").unwrap();
        let dark = reader.property_value("Calibration:Dark").unwrap();

        let mut document = Document::new();
        let mut image = Image::new(vec![100, 100], 1, SampleFormat::UInt8, pixels).unwrap();
        image.properties.insert(Property::new("Instrument:Gain", gain).unwrap()).unwrap();
        document.images.push(image);
        document
            .properties
            .insert(Property::new("Calibration:Dark", dark).unwrap())
            .unwrap();
        XisfWriter::new(File::create(second.path()).unwrap())
            .write_document(&document)
            .unwrap();
    }

    {
        let mut reader = XisfReader::open(File::open(second.path()).unwrap()).unwrap();
        assert_eq!(reader.image_data(0).unwrap(), data);
        assert_eq!(
            reader.image_property_value(0, "Instrument:Gain").unwrap(),
            PropertyValue::Float32(1.5)
        );
        assert_eq!(
            reader.property_value("Calibration:Dark").unwrap(),
            PropertyValue::Vector(VectorValue::I32((0..2000).collect()))
        );
    }
}
