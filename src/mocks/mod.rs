pub mod mock_line;
