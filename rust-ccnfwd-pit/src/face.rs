//! Face liveness as seen by the PIT.
//!
//! The transport layer owns the faces; the PIT only asks whether a face is
//! still up so that lazy cleanup can drop consumers whose connection went away.

use dashmap::DashMap;
use rust_ccnfwd_common::types::FaceId;

/// Transport-side view the PIT relies on.
pub trait FaceManager: Send + Sync {
    fn is_face_alive(&self, face: FaceId) -> bool;

    /// OS-level handle backing the face, if any.
    fn transport_handle(&self, face: FaceId) -> Option<i32>;
}

/// Table of open faces and their transport handles.
#[derive(Debug, Default)]
pub struct LiveFaces {
    faces: DashMap<FaceId, i32>,
}

impl LiveFaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with `faces` open, each using its id as handle.
    pub fn with_faces(faces: impl IntoIterator<Item = u16>) -> Self {
        let table = Self::new();
        for id in faces {
            table.open(FaceId(id), id as i32);
        }
        table
    }

    pub fn open(&self, face: FaceId, handle: i32) {
        self.faces.insert(face, handle);
    }

    pub fn close(&self, face: FaceId) -> bool {
        self.faces.remove(&face).is_some()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

impl FaceManager for LiveFaces {
    fn is_face_alive(&self, face: FaceId) -> bool {
        self.faces.contains_key(&face)
    }

    fn transport_handle(&self, face: FaceId) -> Option<i32> {
        self.faces.get(&face).map(|h| *h)
    }
}
