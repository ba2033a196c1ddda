use bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use uuid::Uuid;

use crate::data;

use super::{
    Course, Event, EventAttendance, ATTENDANCE_COLLECTION_NAME, COURSE_COLLECTION_NAME,
    EVENT_COLLECTION_NAME,
};

pub trait CourseDbExt {
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, mongodb::error::Error>;
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, mongodb::error::Error>;

    /// Whether the holder of `normalized_document` is on the event's
    /// attendance list.
    async fn attendance_confirmed(
        &self,
        event_id: Uuid,
        normalized_document: &str,
    ) -> Result<bool, mongodb::error::Error>;

    /// Test/tooling seam; production attendance rows arrive from the event
    /// check-in system.
    async fn record_attendance(
        &self,
        attendance: &EventAttendance,
    ) -> Result<(), mongodb::error::Error>;
}

impl CourseDbExt for Database {
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, mongodb::error::Error> {
        self.collection(COURSE_COLLECTION_NAME)
            .find_one(data::by_id(id), None)
            .await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, mongodb::error::Error> {
        self.collection(EVENT_COLLECTION_NAME)
            .find_one(data::by_id(id), None)
            .await
    }

    async fn attendance_confirmed(
        &self,
        event_id: Uuid,
        normalized_document: &str,
    ) -> Result<bool, mongodb::error::Error> {
        let found = self
            .collection::<EventAttendance>(ATTENDANCE_COLLECTION_NAME)
            .find_one(
                doc! {
                    "event_id": event_id.to_string(),
                    "id_document": normalized_document,
                },
                None,
            )
            .await?;

        Ok(found.is_some())
    }

    async fn record_attendance(
        &self,
        attendance: &EventAttendance,
    ) -> Result<(), mongodb::error::Error> {
        self.collection(ATTENDANCE_COLLECTION_NAME)
            .insert_one(
                bson::to_document(attendance)
                    .expect("EventAttendance must be serializable to BSON"),
                None,
            )
            .await?;
        Ok(())
    }
}

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    db.collection::<EventAttendance>(ATTENDANCE_COLLECTION_NAME)
        .create_index(
            IndexModel::builder()
                .keys(doc! { "event_id": 1, "id_document": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            None,
        )
        .await?;
    Ok(())
}
