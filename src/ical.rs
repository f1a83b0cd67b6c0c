use chrono::Duration;
use icalendar::{Calendar, CalendarDateTime, Component, Event, EventLike};

use crate::models::ClassSchedule;

#[derive(Clone)]
pub struct ICalExporter {
    studio_name: String,
    location: String,
    timezone: String,
}

impl ICalExporter {
    pub fn new(studio_name: impl Into<String>, location: impl Into<String>, timezone: chrono_tz::Tz) -> Self {
        Self {
            studio_name: studio_name.into(),
            location: location.into(),
            timezone: timezone.name().to_string(),
        }
    }

    pub fn generate(&self, classes: &[ClassSchedule]) -> Vec<u8> {
        if classes.is_empty() {
            return Vec::new();
        }

        let mut calendar = Calendar::new();
        calendar.name(&format!("{} Classes", self.studio_name));
        calendar.timezone(self.timezone.as_str());

        for class in classes {
            let start = class.class_date.and_time(class.start_time);
            let end = start + Duration::minutes(class.duration_minutes.into());

            let mut event = Event::new();
            event.summary(&format!("{} with {}", class.class_name, class.instructor));
            event.starts(CalendarDateTime::WithTimezone {
                date_time: start,
                tzid: self.timezone.clone(),
            });
            event.ends(CalendarDateTime::WithTimezone {
                date_time: end,
                tzid: self.timezone.clone(),
            });
            event.location(&self.location);
            event.description(&format!(
                "Instructor: {}\nLevel: {:?}\nCapacity: {}",
                class.instructor, class.difficulty, class.capacity
            ));
            event.uid(&format!("{}-{}-studio-class", class.id, start.format("%Y%m%dT%H%M%S")));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::models::Difficulty;

    fn exporter() -> ICalExporter {
        ICalExporter::new("One Fitness Studio", "Bengaluru", chrono_tz::Asia::Kolkata)
    }

    #[test]
    fn test_generate_single_class() {
        let class = ClassSchedule {
            id: "c1".into(),
            class_name: "Strength".into(),
            instructor: "Anil".into(),
            class_date: NaiveDate::from_ymd_opt(2025, 11, 24).unwrap(),
            start_time: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            duration_minutes: 45,
            capacity: 10,
            difficulty: Difficulty::Advanced,
            icon: None,
        };
        let body = String::from_utf8(exporter().generate(&[class])).unwrap();
        assert!(body.contains("BEGIN:VEVENT"));
        assert!(body.contains("Strength with Anil"));
        assert!(body.contains("TZID=Asia/Kolkata:20251124T063000"));
        assert!(body.contains("TZID=Asia/Kolkata:20251124T071500"));
    }

    #[test]
    fn test_generate_empty() {
        assert!(exporter().generate(&[]).is_empty());
    }
}
