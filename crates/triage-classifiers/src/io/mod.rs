pub mod patient_csv;
